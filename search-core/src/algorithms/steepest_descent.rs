//! Steepest descent.

use crate::algorithms::Algorithm;
use crate::neighbourhood::Neighbourhood;
use crate::problem::Problem;
use crate::search::{SearchContext, SearchError};
use log::debug;

/// Steepest descent: enumerates all moves each step and accepts the one with
/// the largest strictly positive delta. Stops the search when no valid
/// improving move exists, which is exactly a local optimum of the
/// neighbourhood.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteepestDescent;

impl<P, N> Algorithm<P, N> for SteepestDescent
where
    P: Problem,
    N: Neighbourhood<P::Solution>,
{
    fn name(&self) -> &str {
        "steepest descent"
    }

    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError> {
        let moves = search.all_moves(0);
        match search.move_with_largest_delta(&moves, true) {
            Some(mv) => search.accept_move(mv),
            None => {
                debug!("steepest descent: local optimum reached, stopping");
                search.stop();
            }
        }
        Ok(())
    }
}
