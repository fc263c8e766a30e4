//! Tabu search with a bounded history of visited solutions.

use crate::algorithms::Algorithm;
use crate::neighbourhood::Neighbourhood;
use crate::problem::Problem;
use crate::search::{SearchContext, SearchError};
use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Tabu search: accepts the best non-rejected move each step, even when it
/// worsens the current solution, but declares moves tabu when they lead back
/// to a recently visited solution. A tabu move is still allowed when it
/// beats the best solution found so far (aspiration).
///
/// The memory is a bounded history of solution hashes, which expresses
/// "recently visited" independently of the move type. The history persists
/// across runs of the same search. Requires hashable solutions.
pub struct TabuSearch {
    history: usize,
    visited: VecDeque<u64>,
    visited_set: HashSet<u64>,
}

impl TabuSearch {
    /// Creates a tabu search remembering the last `history` visited
    /// solutions.
    pub fn new(history: usize) -> Self {
        TabuSearch {
            history,
            visited: VecDeque::new(),
            visited_set: HashSet::new(),
        }
    }

    pub fn history(&self) -> usize {
        self.history
    }

    fn remember(&mut self, hash: u64) {
        if self.visited_set.insert(hash) {
            self.visited.push_back(hash);
            while self.visited.len() > self.history {
                if let Some(evicted) = self.visited.pop_front() {
                    self.visited_set.remove(&evicted);
                }
            }
        }
    }
}

fn solution_hash<S: Hash>(solution: &S) -> u64 {
    let mut hasher = DefaultHasher::new();
    solution.hash(&mut hasher);
    hasher.finish()
}

impl<P, N> Algorithm<P, N> for TabuSearch
where
    P: Problem,
    P::Solution: Hash,
    N: Neighbourhood<P::Solution>,
{
    fn name(&self) -> &str {
        "tabu search"
    }

    fn init(&mut self) -> Result<(), SearchError> {
        if self.history == 0 {
            return Err(SearchError::Init(
                "tabu history size must be positive".into(),
            ));
        }
        Ok(())
    }

    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError> {
        if self.visited.is_empty() {
            if let Some(current) = search.current_solution() {
                self.remember(solution_hash(&current));
            }
        }
        let Some(current_evaluation) = search.current_evaluation() else {
            search.stop();
            return Ok(());
        };
        let best_evaluation = search.best_evaluation();

        let moves = search.all_moves(0);
        let mut chosen: Option<(N::Move, u64, f64)> = None;
        for mv in moves {
            if search.is_rejected_move(&mv) {
                continue;
            }
            let evaluation = search.evaluate_move(&mv);
            let Some(target) = search.with_applied(&mv, solution_hash) else {
                continue;
            };
            let tabu = self.visited_set.contains(&target);
            let aspiration = best_evaluation
                .map_or(true, |best| search.delta(&evaluation, &best) > 0.0);
            if tabu && !aspiration {
                continue;
            }
            let delta = search.delta(&evaluation, &current_evaluation);
            if chosen.as_ref().is_none_or(|(_, _, largest)| delta > *largest) {
                chosen = Some((mv, target, delta));
            }
        }

        match chosen {
            None => {
                debug!("tabu search: all moves tabu or rejected, stopping");
                search.stop();
            }
            Some((mv, target, _)) => {
                search.accept_move(mv);
                self.remember(target);
            }
        }
        Ok(())
    }
}
