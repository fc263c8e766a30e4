//! Random descent.

use crate::algorithms::Algorithm;
use crate::neighbourhood::Neighbourhood;
use crate::problem::Problem;
use crate::search::{SearchContext, SearchError};
use log::debug;

/// Random descent: samples one random move per step and accepts it exactly
/// when it is valid and strictly improves the current solution.
///
/// Stops the search when the neighbourhood has no legal moves, since the
/// current solution can then never change again.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDescent;

impl<P, N> Algorithm<P, N> for RandomDescent
where
    P: Problem,
    N: Neighbourhood<P::Solution>,
{
    fn name(&self) -> &str {
        "random descent"
    }

    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError> {
        match search.random_move(0) {
            None => {
                debug!("random descent: no moves available, stopping");
                search.stop();
            }
            Some(mv) => {
                if search.is_improvement(&mv) {
                    search.accept_move(mv);
                } else {
                    search.reject_move(&mv);
                }
            }
        }
        Ok(())
    }
}
