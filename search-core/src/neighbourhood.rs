//! Moves and neighbourhoods.
//!
//! A neighbourhood defines the set of moves that are legal from a given
//! solution, with both uniform sampling (for stochastic searches) and full
//! enumeration (for deterministic descent). Moves mutate a solution in place
//! and carry a guaranteed inverse, so the engine can evaluate a candidate by
//! applying, inspecting and undoing it.

use crate::subset::SubsetSolution;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::hash::Hash;

/// A reversible perturbation of a solution.
///
/// Applying a move and then undoing it must restore the solution to its
/// observable pre-state. Moves are hashable by value over their operative
/// fields, which keys the evaluated-move cache. The `Any` supertrait lets
/// problems downcast moves to concrete types for delta evaluation.
pub trait Move<S>: Clone + Eq + Hash + Send + Any {
    fn apply(&self, solution: &mut S);
    fn undo(&self, solution: &mut S);
}

/// The set of moves legal from a given solution, as a function from solution
/// to moves.
///
/// Neighbourhoods are stateless with respect to randomness: the generator is
/// always supplied by the caller, so a single neighbourhood instance can be
/// shared across concurrently running searches without shared RNG state.
pub trait Neighbourhood<S>: Send + Sync {
    type Move: Move<S>;

    /// Draws one move with an unbiased distribution over the legal move set,
    /// or `None` if that set is empty.
    fn random_move(&self, solution: &S, rng: &mut dyn RngCore) -> Option<Self::Move>;

    /// Enumerates every legal move. Possibly empty.
    fn all_moves(&self, solution: &S) -> Vec<Self::Move>;
}

/// A swap move on a [`SubsetSolution`]: removes `delete` from the selection
/// and inserts `add`. Preserves the selection size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapMove {
    add: usize,
    delete: usize,
}

impl SwapMove {
    pub fn new(add: usize, delete: usize) -> Self {
        SwapMove { add, delete }
    }

    /// The ID inserted into the selection.
    pub fn added(&self) -> usize {
        self.add
    }

    /// The ID removed from the selection.
    pub fn deleted(&self) -> usize {
        self.delete
    }
}

impl Move<SubsetSolution> for SwapMove {
    fn apply(&self, solution: &mut SubsetSolution) {
        solution.deselect(self.delete);
        solution.select(self.add);
    }

    fn undo(&self, solution: &mut SubsetSolution) {
        solution.deselect(self.add);
        solution.select(self.delete);
    }
}

/// Neighbourhood of all single swaps on a fixed-size subset selection.
///
/// Legal moves are all `SwapMove(add, delete)` with `delete` drawn from the
/// selected IDs and `add` from the unselected IDs, excluding a configurable
/// set of fixed IDs that may never be swapped in or out.
#[derive(Debug, Clone, Default)]
pub struct SingleSwapNeighbourhood {
    fixed: BTreeSet<usize>,
}

impl SingleSwapNeighbourhood {
    pub fn new() -> Self {
        SingleSwapNeighbourhood::default()
    }

    /// Creates a neighbourhood that never moves any of the given IDs.
    pub fn with_fixed_ids(fixed: impl IntoIterator<Item = usize>) -> Self {
        SingleSwapNeighbourhood {
            fixed: fixed.into_iter().collect(),
        }
    }

    pub fn fixed_ids(&self) -> &BTreeSet<usize> {
        &self.fixed
    }

    fn removable(&self, solution: &SubsetSolution) -> Vec<usize> {
        solution
            .selected()
            .iter()
            .copied()
            .filter(|id| !self.fixed.contains(id))
            .collect()
    }

    fn addable(&self, solution: &SubsetSolution) -> Vec<usize> {
        solution
            .unselected()
            .iter()
            .copied()
            .filter(|id| !self.fixed.contains(id))
            .collect()
    }
}

impl Neighbourhood<SubsetSolution> for SingleSwapNeighbourhood {
    type Move = SwapMove;

    fn random_move(&self, solution: &SubsetSolution, rng: &mut dyn RngCore) -> Option<SwapMove> {
        let removable = self.removable(solution);
        let addable = self.addable(solution);
        if removable.is_empty() || addable.is_empty() {
            return None;
        }
        let delete = removable[rng.random_range(0..removable.len())];
        let add = addable[rng.random_range(0..addable.len())];
        Some(SwapMove::new(add, delete))
    }

    fn all_moves(&self, solution: &SubsetSolution) -> Vec<SwapMove> {
        let removable = self.removable(solution);
        let addable = self.addable(solution);
        let mut moves = Vec::with_capacity(removable.len() * addable.len());
        for &delete in &removable {
            for &add in &addable {
                moves.push(SwapMove::new(add, delete));
            }
        }
        moves
    }
}
