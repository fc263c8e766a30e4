//! # Search-Core: Local-Search Metaheuristics Engine
//!
//! This crate provides a generic engine for discrete combinatorial
//! optimization by local search. A user-defined [`Problem`] describes the
//! solution space, the objective and the constraints; a [`Neighbourhood`]
//! produces reversible [`Move`]s; and a [`Search`] drives an algorithm that
//! iteratively perturbs a current solution, tracks the best solution found
//! and honours a set of stop criteria.
//!
//! Five algorithms ship with the engine: random descent, steepest descent,
//! tabu search, variable neighbourhood descent and parallel tempering. All
//! of them are expressed against the same small set of step primitives, so
//! adding an algorithm means implementing a single-step decision rule, not a
//! search loop. The subset-selection domain ([`SubsetSolution`],
//! [`SubsetProblem`], [`SingleSwapNeighbourhood`]) is included as the
//! canonical concrete instantiation.
//!
//! ## Quick Example
//!
//! Select the 2 best-scoring IDs out of 5 with steepest descent:
//!
//! ```no_run
//! use search_core::{Objective, Search, SingleSwapNeighbourhood, StopConditions, SubsetProblem};
//!
//! # fn main() -> Result<(), search_core::SearchError> {
//! let scores = vec![0.0, 1.0, 2.0, 3.0, 4.0];
//! let problem = SubsetProblem::new(scores, Objective::Maximize, 2)?;
//! let search = Search::steepest_descent(problem, SingleSwapNeighbourhood::new());
//! search.add_stop_conditions(&StopConditions {
//!     max_runtime_ms: Some(100),
//!     ..Default::default()
//! })?;
//!
//! // blocks until the search terminates and is idle again
//! search.start()?;
//!
//! if let Some(best) = search.best_solution() {
//!     println!(
//!         "best selection {:?}, evaluation {:?}",
//!         best.selected(),
//!         search.best_evaluation()
//!     );
//! }
//! search.dispose()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! A search is a small state machine: idle searches are started (blocking
//! the calling thread for the duration of the run), running searches stop
//! cooperatively through stop criteria, an external [`Search::stop`] call or
//! the algorithm itself, and idle searches can be disposed. The best and
//! current solutions survive across runs, so restarting a search continues
//! where the previous run left off. All operations other than `start` are
//! safe to call from other threads; configuration is only permitted while
//! the search is idle.
//!
//! ## Concurrency
//!
//! Problems, neighbourhoods and stop criteria are shared-immutable and may
//! be used by several searches at once. Every search owns one background
//! thread while running, used by the stop-criterion checker; parallel
//! tempering additionally sweeps its replicas on scoped threads. Random
//! generators are never shared between threads.
//!
//! ## Logging
//!
//! The engine logs through the [`log`] facade: per-step events at debug
//! level, lifecycle events at info level and configuration problems at warn
//! level. Without an installed logger this is a no-op.

pub mod algorithms;
pub mod cache;
pub mod neighbourhood;
pub mod problem;
pub mod search;
pub mod stop;
pub mod subset;

pub use cache::{EvaluatedMoveCache, SingleEvaluatedMoveCache};
pub use neighbourhood::{Move, Neighbourhood, SingleSwapNeighbourhood, SwapMove};
pub use problem::{Evaluation, Objective, Problem, Solution, Validation};
pub use search::{
    ListenerId, Search, SearchContext, SearchError, SearchListener, SearchStats, Status,
    UNAVAILABLE,
};
pub use stop::{
    MaxRuntime, MaxSteps, MaxStepsWithoutImprovement, MaxTimeWithoutImprovement, MinDelta,
    SearchSnapshot, StopConditions, StopCriterion,
};
pub use subset::{PenalizedPair, PenalizingConstraint, SubsetProblem, SubsetSolution};
