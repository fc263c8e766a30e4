//! Variable neighbourhood descent.

use crate::algorithms::Algorithm;
use crate::neighbourhood::Neighbourhood;
use crate::problem::Problem;
use crate::search::{SearchContext, SearchError};
use log::debug;

/// Variable neighbourhood descent: a steepest step within the active
/// neighbourhood of an ordered list. An accepted improvement resets the
/// search to the first neighbourhood; an exhausted neighbourhood (no valid
/// improving move) advances to the next. When the last neighbourhood is
/// exhausted the current solution is a local optimum of every neighbourhood
/// and the search stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableNeighbourhoodDescent {
    active: usize,
}

impl VariableNeighbourhoodDescent {
    pub fn new() -> Self {
        VariableNeighbourhoodDescent::default()
    }

    /// Index of the neighbourhood the next step will descend in.
    pub fn active_neighbourhood(&self) -> usize {
        self.active
    }
}

impl<P, N> Algorithm<P, N> for VariableNeighbourhoodDescent
where
    P: Problem,
    N: Neighbourhood<P::Solution>,
{
    fn name(&self) -> &str {
        "variable neighbourhood descent"
    }

    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError> {
        let num_neighbourhoods = search.num_neighbourhoods();
        let moves = search.all_moves(self.active);
        match search.move_with_largest_delta(&moves, true) {
            Some(mv) => {
                search.accept_move(mv);
                self.active = 0;
            }
            None => {
                debug!(
                    "variable neighbourhood descent: neighbourhood {} exhausted",
                    self.active
                );
                self.active += 1;
                if self.active >= num_neighbourhoods {
                    debug!("variable neighbourhood descent: all neighbourhoods exhausted, stopping");
                    // leave the descent ready for a restart
                    self.active = 0;
                    search.stop();
                }
            }
        }
        Ok(())
    }
}
