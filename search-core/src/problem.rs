//! Problem model: objective orientation, evaluations, validations and the
//! `Problem` trait that user code implements to describe an optimization
//! problem to the search engine.
//!
//! A problem owns the objective function and the mandatory constraints of the
//! solution space. It produces [`Evaluation`]s and [`Validation`]s for full
//! solutions and, where supported, for incremental moves relative to the
//! current solution (delta evaluation). Soft constraints are expressed as
//! penalties folded into the evaluation value; mandatory constraints decide
//! rejection.

use crate::neighbourhood::Move;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Optimization orientation of a problem.
///
/// The engine performs all comparisons through [`Objective::delta`], which is
/// oriented so that a positive delta always means "better". This keeps a
/// single comparison path for both maximizing and minimizing problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Larger evaluation values are better.
    Maximize,
    /// Smaller evaluation values are better.
    Minimize,
}

impl Objective {
    /// Signed improvement of `new` relative to `old`, oriented so that a
    /// strictly positive result means `new` is strictly better.
    pub fn delta(&self, new: &Evaluation, old: &Evaluation) -> f64 {
        match self {
            Objective::Maximize => new.value() - old.value(),
            Objective::Minimize => old.value() - new.value(),
        }
    }

    /// Maps an evaluation to an oriented scalar where larger is always
    /// better, regardless of orientation.
    pub fn oriented_value(&self, evaluation: &Evaluation) -> f64 {
        match self {
            Objective::Maximize => evaluation.value(),
            Objective::Minimize => -evaluation.value(),
        }
    }
}

/// The evaluation of a solution: a wrapper around a real objective value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    value: f64,
}

impl Evaluation {
    pub fn new(value: f64) -> Self {
        Evaluation { value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Composes a nonnegative penalty into the evaluation: subtracted when
    /// maximizing, added when minimizing, so a penalized solution is always
    /// worse than its unpenalized counterpart.
    pub fn penalize(&self, penalty: f64, objective: Objective) -> Evaluation {
        debug_assert!(penalty >= 0.0, "penalty must be nonnegative");
        match objective {
            Objective::Maximize => Evaluation::new(self.value - penalty),
            Objective::Minimize => Evaluation::new(self.value + penalty),
        }
    }
}

/// The validation of a solution against a problem's constraints.
///
/// A validation carries a nonnegative penalty, zero if and only if the
/// validation passed. Penalizing constraints produce finite penalties;
/// failure of a mandatory constraint is an infinite penalty, which marks the
/// solution as rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    penalty: f64,
}

impl Validation {
    /// A validation that passed (zero penalty).
    pub fn passed() -> Self {
        Validation { penalty: 0.0 }
    }

    /// A validation that failed a mandatory constraint.
    pub fn failed() -> Self {
        Validation {
            penalty: f64::INFINITY,
        }
    }

    /// A penalizing validation. Passes exactly when `penalty` is zero.
    pub fn with_penalty(penalty: f64) -> Self {
        assert!(penalty >= 0.0, "penalty must be nonnegative");
        Validation { penalty }
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn is_passed(&self) -> bool {
        self.penalty == 0.0
    }
}

/// Marker trait for solution types.
///
/// Solutions are opaque to the engine: any clonable, comparable value
/// qualifies. Cloning is the deep-copy boundary used to protect the engine's
/// current and best solutions from external mutation.
pub trait Solution: Clone + PartialEq + Send + 'static {}

impl<T: Clone + PartialEq + Send + 'static> Solution for T {}

/// A user-defined optimization problem.
///
/// Problems are shared-immutable: a single problem instance may be referenced
/// by several concurrently running searches, so implementations must be safe
/// for concurrent read-only use (`Send + Sync`).
///
/// The delta methods are optional. Returning `None` makes the engine fall
/// back to applying the move, evaluating the full solution and undoing the
/// move again. Implementations that can compute the effect of a move
/// incrementally should override them; see
/// [`SubsetProblem`](crate::subset::SubsetProblem) for an example.
pub trait Problem: Send + Sync {
    type Solution: Solution;

    /// Whether this problem maximizes or minimizes its evaluation.
    fn objective(&self) -> Objective;

    /// Evaluates a solution. Penalties of soft constraints are folded into
    /// the returned value.
    fn evaluate(&self, solution: &Self::Solution) -> Evaluation;

    /// Validates a solution against the mandatory constraints.
    fn validate(&self, solution: &Self::Solution) -> Validation;

    /// Convenience: true if and only if any mandatory validation fails.
    /// Rejected solutions never become the best solution of a search.
    fn reject_solution(&self, solution: &Self::Solution) -> bool {
        !self.validate(solution).is_passed()
    }

    /// Creates a random solution, reproducible from the supplied generator.
    fn random_solution(&self, rng: &mut dyn RngCore) -> Self::Solution;

    /// Evaluates the solution obtained by applying `mv` to `current`,
    /// without applying it. `None` means delta evaluation is not supported
    /// for this move type.
    fn evaluate_delta<M: Move<Self::Solution>>(
        &self,
        mv: &M,
        current: &Self::Solution,
        current_evaluation: &Evaluation,
    ) -> Option<Evaluation> {
        let _ = (mv, current, current_evaluation);
        None
    }

    /// Validates the solution obtained by applying `mv` to `current`,
    /// without applying it. `None` means delta validation is not supported
    /// for this move type.
    fn validate_delta<M: Move<Self::Solution>>(
        &self,
        mv: &M,
        current: &Self::Solution,
        current_validation: &Validation,
    ) -> Option<Validation> {
        let _ = (mv, current, current_validation);
        None
    }
}
