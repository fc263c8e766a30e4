//! Search algorithms.
//!
//! Every algorithm implements the [`Algorithm`] trait: one decision per call
//! to `search_step`, expressed through the step primitives of
//! [`SearchContext`](crate::search::SearchContext). The engine owns the
//! lifecycle, the stop criteria and the bookkeeping; the algorithm only
//! decides which move to consider next and whether to accept it.
//!
//! Algorithm-specific state, such as a tabu history or a replica ladder,
//! lives in the algorithm value and survives across runs of the same search.
//! `init` is called at the start of every run and validates the algorithm's
//! configuration.

use crate::neighbourhood::Neighbourhood;
use crate::problem::Problem;
use crate::search::{SearchContext, SearchError};

pub mod parallel_tempering;
pub mod random_descent;
pub mod steepest_descent;
pub mod tabu_search;
pub mod variable_neighbourhood;

pub use parallel_tempering::ParallelTempering;
pub use random_descent::RandomDescent;
pub use steepest_descent::SteepestDescent;
pub use tabu_search::TabuSearch;
pub use variable_neighbourhood::VariableNeighbourhoodDescent;

/// One search algorithm: a single decision per step against the engine's
/// step primitives.
pub trait Algorithm<P: Problem, N: Neighbourhood<P::Solution>>: Send {
    fn name(&self) -> &str;

    /// Validates the algorithm's configuration at the start of a run.
    /// Algorithm state deliberately persists across runs; this is not a
    /// reset hook.
    fn init(&mut self) -> Result<(), SearchError> {
        Ok(())
    }

    /// Performs one step. The engine increments the step counter, fires the
    /// step listeners and polls the stop criteria after this returns.
    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError>;
}
