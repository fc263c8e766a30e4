//! Parallel tempering.

use crate::algorithms::Algorithm;
use crate::neighbourhood::{Move, Neighbourhood};
use crate::problem::{Evaluation, Problem, Validation};
use crate::search::{SearchContext, SearchControl, SearchError};
use log::debug;
use rand::Rng;
use std::thread;

/// Parallel tempering: a ladder of Metropolis replicas at distinct
/// temperatures, swept in cooperating threads.
///
/// Each engine step runs a fixed number of Metropolis iterations per replica
/// in parallel, then attempts swaps between neighbouring replicas so that
/// good solutions migrate towards the coldest replica, and finally adopts
/// the best valid replica solution into the search when it improves the
/// current one. Replica moves are counted as accepted or rejected moves of
/// the search.
///
/// The replica ladder is seeded from the current solution on the first step
/// and persists across runs.
pub struct ParallelTempering<S> {
    num_replicas: usize,
    min_temperature: f64,
    max_temperature: f64,
    replica_steps: u64,
    replicas: Vec<Replica<S>>,
}

struct Replica<S> {
    solution: S,
    evaluation: Evaluation,
    validation: Validation,
    temperature: f64,
}

impl<S> ParallelTempering<S> {
    pub fn new(
        num_replicas: usize,
        min_temperature: f64,
        max_temperature: f64,
        replica_steps: u64,
    ) -> Self {
        ParallelTempering {
            num_replicas,
            min_temperature,
            max_temperature,
            replica_steps,
            replicas: Vec::new(),
        }
    }

    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    fn temperature(&self, replica: usize) -> f64 {
        if self.num_replicas <= 1 {
            self.min_temperature
        } else {
            let fraction = replica as f64 / (self.num_replicas - 1) as f64;
            self.min_temperature + (self.max_temperature - self.min_temperature) * fraction
        }
    }
}

impl<P, N> Algorithm<P, N> for ParallelTempering<P::Solution>
where
    P: Problem,
    N: Neighbourhood<P::Solution>,
{
    fn name(&self) -> &str {
        "parallel tempering"
    }

    fn init(&mut self) -> Result<(), SearchError> {
        if self.num_replicas == 0 {
            return Err(SearchError::Init(
                "parallel tempering requires at least one replica".into(),
            ));
        }
        if !(self.min_temperature > 0.0) || self.max_temperature < self.min_temperature {
            return Err(SearchError::Init(format!(
                "invalid temperature range [{}, {}]",
                self.min_temperature, self.max_temperature
            )));
        }
        if self.replica_steps == 0 {
            return Err(SearchError::Init(
                "replica step count must be positive".into(),
            ));
        }
        Ok(())
    }

    fn search_step(&mut self, search: &mut SearchContext<'_, P, N>) -> Result<(), SearchError> {
        if self.replicas.is_empty() {
            let (Some(solution), Some(evaluation), Some(validation)) = (
                search.current_solution(),
                search.current_evaluation(),
                search.current_validation(),
            ) else {
                return Err(SearchError::Init(
                    "parallel tempering requires a current solution".into(),
                ));
            };
            for index in 0..self.num_replicas {
                self.replicas.push(Replica {
                    solution: solution.clone(),
                    evaluation,
                    validation,
                    temperature: self.temperature(index),
                });
            }
            debug!(
                "parallel tempering: seeded {} replicas in [{}, {}]",
                self.num_replicas, self.min_temperature, self.max_temperature
            );
        }

        // sweep all replicas in cooperating threads, one per replica
        let problem = search.problem();
        let neighbourhood = search
            .neighbourhood(0)
            .ok_or_else(|| SearchError::Init("no neighbourhoods configured".into()))?;
        let control = search.control();
        let replica_steps = self.replica_steps;
        thread::scope(|scope| {
            for replica in self.replicas.iter_mut() {
                scope.spawn(move || {
                    replica_sweep(replica, problem, neighbourhood, control, replica_steps);
                });
            }
        });

        // attempt swaps between neighbouring replicas
        let objective = search.objective();
        let mut rng = rand::rng();
        for index in 0..self.replicas.len().saturating_sub(1) {
            let (left, right) = self.replicas.split_at_mut(index + 1);
            let colder = &mut left[index];
            let hotter = &mut right[0];
            let delta = objective.delta(&hotter.evaluation, &colder.evaluation);
            let exchange_rate = 1.0 / colder.temperature - 1.0 / hotter.temperature;
            if delta >= 0.0 || rng.random::<f64>() < (exchange_rate * delta).exp() {
                std::mem::swap(&mut colder.solution, &mut hotter.solution);
                std::mem::swap(&mut colder.evaluation, &mut hotter.evaluation);
                std::mem::swap(&mut colder.validation, &mut hotter.validation);
            }
        }

        // adopt the best valid replica solution when it improves the search
        let best_replica = self
            .replicas
            .iter()
            .filter(|replica| replica.validation.is_passed())
            .max_by(|a, b| {
                objective
                    .oriented_value(&a.evaluation)
                    .total_cmp(&objective.oriented_value(&b.evaluation))
            });
        if let Some(replica) = best_replica {
            let improves = match search.current_evaluation() {
                Some(current) => objective.delta(&replica.evaluation, &current) > 0.0,
                None => true,
            };
            if improves {
                search.set_current_solution(
                    replica.solution.clone(),
                    replica.evaluation,
                    replica.validation,
                );
            }
        }
        Ok(())
    }
}

/// Runs a fixed number of Metropolis iterations on one replica, counting
/// accepted and rejected moves into the search's shared counters. Uses the
/// calling thread's own generator; no RNG state is shared between replicas.
fn replica_sweep<P, N>(
    replica: &mut Replica<P::Solution>,
    problem: &P,
    neighbourhood: &N,
    control: &SearchControl,
    steps: u64,
) where
    P: Problem,
    N: Neighbourhood<P::Solution>,
{
    let mut rng = rand::rng();
    for _ in 0..steps {
        let Some(mv) = neighbourhood.random_move(&replica.solution, &mut rng) else {
            break;
        };
        let validation = match problem.validate_delta(&mv, &replica.solution, &replica.validation)
        {
            Some(validation) => validation,
            None => {
                mv.apply(&mut replica.solution);
                let validation = problem.validate(&replica.solution);
                mv.undo(&mut replica.solution);
                validation
            }
        };
        if !validation.is_passed() {
            control.note_rejected();
            continue;
        }
        let evaluation = match problem.evaluate_delta(&mv, &replica.solution, &replica.evaluation)
        {
            Some(evaluation) => evaluation,
            None => {
                mv.apply(&mut replica.solution);
                let evaluation = problem.evaluate(&replica.solution);
                mv.undo(&mut replica.solution);
                evaluation
            }
        };
        let delta = problem.objective().delta(&evaluation, &replica.evaluation);
        if delta >= 0.0 || rng.random::<f64>() < (delta / replica.temperature).exp() {
            mv.apply(&mut replica.solution);
            replica.evaluation = evaluation;
            replica.validation = validation;
            control.note_accepted();
        } else {
            control.note_rejected();
        }
    }
}
