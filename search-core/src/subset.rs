//! Subset selection domain: the canonical concrete instantiation of the
//! engine's problem model.
//!
//! A [`SubsetSolution`] partitions a universe of integer IDs into a selected
//! and an unselected set. [`SubsetProblem`] scores each ID and evaluates a
//! solution as the sum of the selected scores, optionally penalized by soft
//! constraints, with a mandatory constraint on the selection size.

use crate::neighbourhood::{Move, SwapMove};
use crate::problem::{Evaluation, Objective, Problem, Validation};
use crate::search::SearchError;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;

/// A partition of a universe of integer IDs into a selected and an
/// unselected subset.
///
/// The two sets are always disjoint and their union is the universe. Sets are
/// ordered, so enumeration order and equality are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsetSolution {
    selected: BTreeSet<usize>,
    unselected: BTreeSet<usize>,
}

impl SubsetSolution {
    /// Creates a solution over the given universe with an empty selection.
    pub fn new(universe: impl IntoIterator<Item = usize>) -> Self {
        SubsetSolution {
            selected: BTreeSet::new(),
            unselected: universe.into_iter().collect(),
        }
    }

    /// Creates a solution over the given universe with the given initial
    /// selection. Panics if the selection is not part of the universe.
    pub fn with_selection(
        universe: impl IntoIterator<Item = usize>,
        selection: impl IntoIterator<Item = usize>,
    ) -> Self {
        let mut solution = SubsetSolution::new(universe);
        for id in selection {
            solution.select(id);
        }
        solution
    }

    /// Moves `id` from the unselected to the selected set. Panics if `id` is
    /// not currently unselected; neighbourhoods only produce legal moves.
    pub fn select(&mut self, id: usize) {
        assert!(
            self.unselected.remove(&id),
            "cannot select ID {id}: not an unselected ID of this solution"
        );
        self.selected.insert(id);
    }

    /// Moves `id` from the selected to the unselected set. Panics if `id` is
    /// not currently selected.
    pub fn deselect(&mut self, id: usize) {
        assert!(
            self.selected.remove(&id),
            "cannot deselect ID {id}: not a selected ID of this solution"
        );
        self.unselected.insert(id);
    }

    pub fn selected(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    pub fn unselected(&self) -> &BTreeSet<usize> {
        &self.unselected
    }

    pub fn is_selected(&self, id: usize) -> bool {
        self.selected.contains(&id)
    }

    pub fn num_selected(&self) -> usize {
        self.selected.len()
    }

    pub fn universe_size(&self) -> usize {
        self.selected.len() + self.unselected.len()
    }
}

/// A soft constraint on subset selections, expressed as a nonnegative
/// penalty. Zero means the constraint is satisfied.
pub trait PenalizingConstraint: Send + Sync {
    fn penalty(&self, solution: &SubsetSolution) -> f64;
}

/// Penalizes selecting two specific IDs together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenalizedPair {
    pub first: usize,
    pub second: usize,
    pub penalty_weight: f64,
}

impl PenalizingConstraint for PenalizedPair {
    fn penalty(&self, solution: &SubsetSolution) -> f64 {
        if solution.is_selected(self.first) && solution.is_selected(self.second) {
            self.penalty_weight
        } else {
            0.0
        }
    }
}

/// A subset selection problem over a universe of scored IDs.
///
/// The universe is `0..scores.len()`; a solution is evaluated as the sum of
/// the scores of its selected IDs, penalized by any registered soft
/// constraints. The selection size is a mandatory constraint: it must lie in
/// `[min_size, max_size]` (fixed-size problems set both bounds equal).
pub struct SubsetProblem {
    scores: Vec<f64>,
    objective: Objective,
    min_size: usize,
    max_size: usize,
    constraints: Vec<Box<dyn PenalizingConstraint>>,
}

impl SubsetProblem {
    /// Creates a fixed-size subset problem.
    pub fn new(scores: Vec<f64>, objective: Objective, size: usize) -> Result<Self, SearchError> {
        SubsetProblem::with_size_range(scores, objective, size, size)
    }

    /// Creates a subset problem with a variable selection size.
    pub fn with_size_range(
        scores: Vec<f64>,
        objective: Objective,
        min_size: usize,
        max_size: usize,
    ) -> Result<Self, SearchError> {
        if scores.is_empty() {
            return Err(SearchError::InvalidInput(
                "score list must not be empty".into(),
            ));
        }
        if min_size == 0 || min_size > max_size || max_size > scores.len() {
            return Err(SearchError::InvalidInput(format!(
                "inconsistent selection size range [{min_size}, {max_size}] for a universe of {} IDs",
                scores.len()
            )));
        }
        Ok(SubsetProblem {
            scores,
            objective,
            min_size,
            max_size,
            constraints: Vec::new(),
        })
    }

    /// Registers a soft constraint whose penalty is folded into evaluations.
    pub fn add_penalizing_constraint(&mut self, constraint: Box<dyn PenalizingConstraint>) {
        self.constraints.push(constraint);
    }

    pub fn universe_size(&self) -> usize {
        self.scores.len()
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn selection_score(&self, solution: &SubsetSolution) -> f64 {
        solution.selected().iter().map(|&id| self.scores[id]).sum()
    }
}

impl Problem for SubsetProblem {
    type Solution = SubsetSolution;

    fn objective(&self) -> Objective {
        self.objective
    }

    fn evaluate(&self, solution: &SubsetSolution) -> Evaluation {
        let base = Evaluation::new(self.selection_score(solution));
        let penalty: f64 = self.constraints.iter().map(|c| c.penalty(solution)).sum();
        base.penalize(penalty, self.objective)
    }

    fn validate(&self, solution: &SubsetSolution) -> Validation {
        let size = solution.num_selected();
        if size < self.min_size || size > self.max_size {
            Validation::failed()
        } else {
            Validation::passed()
        }
    }

    fn random_solution(&self, rng: &mut dyn RngCore) -> SubsetSolution {
        let mut ids: Vec<usize> = (0..self.scores.len()).collect();
        ids.shuffle(rng);
        let size = if self.min_size == self.max_size {
            self.min_size
        } else {
            rng.random_range(self.min_size..=self.max_size)
        };
        let mut solution = SubsetSolution::new(0..self.scores.len());
        for &id in ids.iter().take(size) {
            solution.select(id);
        }
        solution
    }

    fn evaluate_delta<M: Move<SubsetSolution>>(
        &self,
        mv: &M,
        _current: &SubsetSolution,
        current_evaluation: &Evaluation,
    ) -> Option<Evaluation> {
        // Penalty terms may depend on the whole selection, so the shortcut
        // only holds for the plain scored objective.
        if !self.constraints.is_empty() {
            return None;
        }
        let swap = (mv as &dyn Any).downcast_ref::<SwapMove>()?;
        Some(Evaluation::new(
            current_evaluation.value() + self.scores[swap.added()] - self.scores[swap.deleted()],
        ))
    }

    fn validate_delta<M: Move<SubsetSolution>>(
        &self,
        mv: &M,
        _current: &SubsetSolution,
        current_validation: &Validation,
    ) -> Option<Validation> {
        // Swaps preserve the selection size, so validity carries over.
        (mv as &dyn Any).downcast_ref::<SwapMove>()?;
        Some(*current_validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scored_problem(size: usize) -> SubsetProblem {
        SubsetProblem::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], Objective::Maximize, size)
            .expect("valid problem")
    }

    #[test]
    fn partition_invariants_hold_after_selection_changes() {
        let mut solution = SubsetSolution::new(0..6);
        solution.select(2);
        solution.select(5);
        solution.deselect(2);
        solution.select(0);

        assert_eq!(solution.universe_size(), 6);
        assert_eq!(solution.num_selected(), 2);
        assert!(solution
            .selected()
            .intersection(solution.unselected())
            .next()
            .is_none());
        let union: BTreeSet<usize> = solution
            .selected()
            .union(solution.unselected())
            .copied()
            .collect();
        assert_eq!(union, (0..6).collect::<BTreeSet<usize>>());
    }

    #[test]
    #[should_panic(expected = "cannot select")]
    fn selecting_a_selected_id_panics() {
        let mut solution = SubsetSolution::with_selection(0..3, [1]);
        solution.select(1);
    }

    #[test]
    fn swap_sequence_preserves_selection_size() {
        let mut solution = SubsetSolution::with_selection(0..8, [0, 1, 2]);
        let swaps = [
            SwapMove::new(5, 0),
            SwapMove::new(7, 2),
            SwapMove::new(0, 1),
        ];
        for mv in &swaps {
            mv.apply(&mut solution);
            assert_eq!(solution.num_selected(), 3);
            assert_eq!(solution.universe_size(), 8);
        }
    }

    #[test]
    fn evaluation_sums_selected_scores() {
        let problem = scored_problem(3);
        let solution = SubsetSolution::with_selection(0..5, [2, 3, 4]);
        assert_eq!(problem.evaluate(&solution).value(), 9.0);
    }

    #[test]
    fn evaluation_folds_in_penalties() {
        let mut problem = scored_problem(3);
        problem.add_penalizing_constraint(Box::new(PenalizedPair {
            first: 3,
            second: 4,
            penalty_weight: 2.5,
        }));
        let both = SubsetSolution::with_selection(0..5, [2, 3, 4]);
        assert_eq!(problem.evaluate(&both).value(), 6.5);
        let one = SubsetSolution::with_selection(0..5, [1, 2, 4]);
        assert_eq!(problem.evaluate(&one).value(), 7.0);
    }

    #[test]
    fn validation_enforces_size_bounds() {
        let problem =
            SubsetProblem::with_size_range(vec![1.0; 6], Objective::Minimize, 2, 4).unwrap();
        assert!(!problem
            .validate(&SubsetSolution::with_selection(0..6, [0]))
            .is_passed());
        assert!(problem
            .validate(&SubsetSolution::with_selection(0..6, [0, 1, 2]))
            .is_passed());
        assert!(!problem
            .validate(&SubsetSolution::with_selection(0..6, [0, 1, 2, 3, 4]))
            .is_passed());
    }

    #[test]
    fn construction_rejects_inconsistent_sizes() {
        assert!(matches!(
            SubsetProblem::new(vec![1.0, 2.0], Objective::Maximize, 3),
            Err(SearchError::InvalidInput(_))
        ));
        assert!(matches!(
            SubsetProblem::with_size_range(vec![1.0, 2.0], Objective::Maximize, 2, 1),
            Err(SearchError::InvalidInput(_))
        ));
        assert!(matches!(
            SubsetProblem::new(Vec::new(), Objective::Maximize, 1),
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[test]
    fn random_solutions_have_the_required_size() {
        let problem = scored_problem(3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let solution = problem.random_solution(&mut rng);
            assert_eq!(solution.num_selected(), 3);
            assert_eq!(solution.universe_size(), 5);
        }

        let ranged =
            SubsetProblem::with_size_range(vec![1.0; 10], Objective::Maximize, 2, 5).unwrap();
        for _ in 0..20 {
            let solution = ranged.random_solution(&mut rng);
            assert!((2..=5).contains(&solution.num_selected()));
        }
    }

    #[test]
    fn delta_evaluation_matches_full_evaluation() {
        let problem = scored_problem(2);
        let mut solution = SubsetSolution::with_selection(0..5, [0, 1]);
        let current = problem.evaluate(&solution);
        let mv = SwapMove::new(4, 0);

        let delta = problem
            .evaluate_delta(&mv, &solution, &current)
            .expect("swap delta supported");
        mv.apply(&mut solution);
        assert_eq!(delta, problem.evaluate(&solution));
    }

    #[test]
    fn delta_evaluation_disabled_with_penalizing_constraints() {
        let mut problem = scored_problem(2);
        problem.add_penalizing_constraint(Box::new(PenalizedPair {
            first: 0,
            second: 1,
            penalty_weight: 1.0,
        }));
        let solution = SubsetSolution::with_selection(0..5, [0, 1]);
        let current = problem.evaluate(&solution);
        assert!(problem
            .evaluate_delta(&SwapMove::new(4, 0), &solution, &current)
            .is_none());
    }
}
