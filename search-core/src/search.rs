//! The search engine: lifecycle state machine, thread-shared metadata,
//! listeners and the neighbourhood-search step loop.
//!
//! A [`Search`] couples a problem, one or more neighbourhoods and an
//! [`Algorithm`] that performs one decision per step. `start()` runs the step
//! loop on the calling thread and blocks until the search goes back to idle;
//! all other operations take `&self` and are safe to call from other threads,
//! so a search can be stopped, observed or (when idle) reconfigured while a
//! run is in progress elsewhere.

use crate::algorithms::{
    Algorithm, ParallelTempering, RandomDescent, SteepestDescent, TabuSearch,
    VariableNeighbourhoodDescent,
};
use crate::cache::{EvaluatedMoveCache, SingleEvaluatedMoveCache};
use crate::neighbourhood::{Move, Neighbourhood};
use crate::problem::{Evaluation, Objective, Problem, Validation};
use crate::stop::{SearchSnapshot, StopConditions, StopCriterion, StopCriterionChecker};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Sentinel returned from count and duration getters that are not meaningful
/// in the current status, for example before the first run.
pub const UNAVAILABLE: i64 = -1;

/// Lifecycle status of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// Constructed or between runs; the only status in which a search can be
    /// reconfigured.
    Idle,
    /// `start()` is validating the configuration and preparing the run.
    Initializing,
    /// The step loop is executing.
    Running,
    /// A stop was requested; the loop exits before its next step.
    Terminating,
    /// Terminal status; resources have been released.
    Disposed,
}

/// Errors surfaced by search operations.
#[derive(Error, Debug, Serialize)]
pub enum SearchError {
    /// The search configuration is invalid; surfaced from `start()`, which
    /// returns the search to idle.
    #[error("search initialization failed: {0}")]
    Init(String),
    /// A mutating operation requires an idle search.
    #[error("operation requires an idle search, but status is {0:?}")]
    NotIdle(Status),
    /// The search has been disposed.
    #[error("search has been disposed")]
    Disposed,
    /// An evaluation performed by user-supplied code failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    /// A validation performed by user-supplied code failed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// An argument does not satisfy the documented preconditions.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Callbacks fired by a search during its lifecycle.
///
/// All methods default to no-ops, so listeners implement only the events they
/// care about. Callbacks receive cloned payloads and are fired outside the
/// engine's solution lock; they may read search getters but must not call
/// listener-mutating operations.
pub trait SearchListener<S>: Send {
    fn search_started(&mut self) {}
    fn search_stopped(&mut self) {}
    fn new_best_solution(&mut self, solution: &S, evaluation: &Evaluation) {
        let _ = (solution, evaluation);
    }
    fn step_completed(&mut self, steps: u64) {
        let _ = steps;
    }
    fn status_changed(&mut self, status: Status) {
        let _ = status;
    }
    fn modified_current_solution(&mut self, solution: &S, evaluation: &Evaluation) {
        let _ = (solution, evaluation);
    }
}

/// Token identifying a registered listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(u64);

/// Aggregated per-run statistics of a search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub steps: i64,
    pub runtime_ms: i64,
    pub num_accepted_moves: i64,
    pub num_rejected_moves: i64,
    pub min_delta: f64,
    pub best_evaluation: Option<f64>,
}

/// Run-timing block guarded by a single mutex inside [`SearchControl`].
#[derive(Debug, Default)]
struct RunTiming {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    last_improvement_at: Option<Instant>,
    improved: bool,
    min_delta: Option<f64>,
}

/// Thread-shared control block of a search: the status cell plus the per-run
/// metadata read by stop criteria and cross-thread getters.
///
/// Counters are atomics, so reads from other threads observe a value between
/// zero and the true count at that instant; everything time-based sits behind
/// one small mutex.
pub(crate) struct SearchControl {
    status: Mutex<Status>,
    steps: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    last_improvement_step: AtomicU64,
    timing: Mutex<RunTiming>,
}

impl SearchControl {
    fn new() -> Self {
        SearchControl {
            status: Mutex::new(Status::Idle),
            steps: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_improvement_step: AtomicU64::new(0),
            timing: Mutex::new(RunTiming::default()),
        }
    }

    pub(crate) fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    /// Performs the RUNNING to TERMINATING transition. Returns false when the
    /// search is in any other status, which makes stop requests idempotent
    /// and safe from any thread.
    pub(crate) fn request_stop(&self) -> bool {
        let mut status = self.status.lock().unwrap();
        if *status == Status::Running {
            *status = Status::Terminating;
            true
        } else {
            false
        }
    }

    /// Resets all per-run metadata at the beginning of a run.
    fn begin_run(&self) {
        self.steps.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.last_improvement_step.store(0, Ordering::Relaxed);
        let mut timing = self.timing.lock().unwrap();
        *timing = RunTiming::default();
    }

    fn mark_running(&self) {
        self.timing.lock().unwrap().started_at = Some(Instant::now());
    }

    fn mark_stopped(&self) {
        self.timing.lock().unwrap().stopped_at = Some(Instant::now());
    }

    fn note_step(&self) -> u64 {
        self.steps.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn note_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an improvement of the best solution. `delta` is the absolute
    /// evaluation change, absent for the very first best solution.
    fn note_improvement(&self, delta: Option<f64>) {
        self.last_improvement_step
            .store(self.steps.load(Ordering::Relaxed), Ordering::Relaxed);
        let mut timing = self.timing.lock().unwrap();
        timing.last_improvement_at = Some(Instant::now());
        timing.improved = true;
        if let Some(delta) = delta {
            let delta = delta.abs();
            timing.min_delta = Some(timing.min_delta.map_or(delta, |min| min.min(delta)));
        }
    }

    /// Captures a point-in-time view of the metadata. Fields are `None` when
    /// the search is not running and has not completed a run.
    pub(crate) fn snapshot(&self) -> SearchSnapshot {
        let status = self.status();
        let timing = self.timing.lock().unwrap();
        let active = matches!(status, Status::Running | Status::Terminating);
        let after_run = status == Status::Idle && timing.stopped_at.is_some();
        if !active && !after_run {
            return SearchSnapshot {
                status,
                runtime: None,
                steps: None,
                time_without_improvement: None,
                steps_without_improvement: None,
                min_delta: None,
                num_accepted_moves: None,
                num_rejected_moves: None,
            };
        }
        let reference = if active {
            Instant::now()
        } else {
            timing.stopped_at.unwrap_or_else(Instant::now)
        };
        let runtime = timing
            .started_at
            .map(|started| reference.saturating_duration_since(started));
        let steps = self.steps.load(Ordering::Relaxed);
        let time_without_improvement = if timing.improved {
            timing
                .last_improvement_at
                .map(|at| reference.saturating_duration_since(at))
        } else {
            runtime
        };
        let steps_without_improvement = if timing.improved {
            steps.saturating_sub(self.last_improvement_step.load(Ordering::Relaxed))
        } else {
            steps
        };
        SearchSnapshot {
            status,
            runtime,
            steps: Some(steps),
            time_without_improvement,
            steps_without_improvement: Some(steps_without_improvement),
            min_delta: timing.min_delta,
            num_accepted_moves: Some(self.accepted.load(Ordering::Relaxed)),
            num_rejected_moves: Some(self.rejected.load(Ordering::Relaxed)),
        }
    }
}

/// Solution-level state of a search, guarded by one mutex together with the
/// evaluated-move cache so that clearing the cache on solution changes is
/// atomic. Locked per primitive, never across a whole run.
struct SearchState<S, M> {
    current: Option<S>,
    current_evaluation: Option<Evaluation>,
    current_validation: Option<Validation>,
    best: Option<S>,
    best_evaluation: Option<Evaluation>,
    cache: Box<dyn EvaluatedMoveCache<M>>,
    rng: StdRng,
}

type Listeners<S> = Arc<Mutex<Vec<(ListenerId, Box<dyn SearchListener<S>>)>>>;

/// A local-search run over a problem and one or more neighbourhoods.
///
/// The lifecycle is a state machine: idle searches can be started (blocking
/// the caller until the run finishes), running searches can be stopped from
/// any thread, and idle searches can be disposed, which is terminal. The best
/// solution and the current solution survive across runs, so a search can be
/// restarted to continue where it left off.
pub struct Search<P: Problem, N: Neighbourhood<P::Solution>> {
    name: String,
    id: Uuid,
    problem: Arc<P>,
    neighbourhoods: Vec<N>,
    control: Arc<SearchControl>,
    state: Mutex<SearchState<P::Solution, N::Move>>,
    algorithm: Mutex<Box<dyn Algorithm<P, N>>>,
    listeners: Listeners<P::Solution>,
    next_listener_id: AtomicU64,
    checker: StopCriterionChecker,
}

impl<P: Problem, N: Neighbourhood<P::Solution>> std::fmt::Display for Search<P, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.id)
    }
}

impl<P: Problem, N: Neighbourhood<P::Solution>> Search<P, N> {
    /// Creates a search with an explicit algorithm and neighbourhood list.
    pub fn new(
        name: impl Into<String>,
        problem: P,
        neighbourhoods: Vec<N>,
        algorithm: Box<dyn Algorithm<P, N>>,
    ) -> Self {
        Search {
            name: name.into(),
            id: Uuid::new_v4(),
            problem: Arc::new(problem),
            neighbourhoods,
            control: Arc::new(SearchControl::new()),
            state: Mutex::new(SearchState {
                current: None,
                current_evaluation: None,
                current_validation: None,
                best: None,
                best_evaluation: None,
                cache: Box::new(SingleEvaluatedMoveCache::new()),
                rng: StdRng::from_rng(&mut rand::rng()),
            }),
            algorithm: Mutex::new(algorithm),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            checker: StopCriterionChecker::new(),
        }
    }

    /// Random descent: accept a random move when it improves, reject it
    /// otherwise.
    pub fn random_descent(problem: P, neighbourhood: N) -> Self {
        Search::new(
            "random descent",
            problem,
            vec![neighbourhood],
            Box::new(RandomDescent),
        )
    }

    /// Steepest descent: accept the best improving move, stop at a local
    /// optimum.
    pub fn steepest_descent(problem: P, neighbourhood: N) -> Self {
        Search::new(
            "steepest descent",
            problem,
            vec![neighbourhood],
            Box::new(SteepestDescent),
        )
    }

    /// Tabu search with a bounded history of visited solutions.
    pub fn tabu_search(problem: P, neighbourhood: N, history: usize) -> Self
    where
        P::Solution: Hash,
    {
        Search::new(
            "tabu search",
            problem,
            vec![neighbourhood],
            Box::new(TabuSearch::new(history)),
        )
    }

    /// Variable neighbourhood descent over an ordered neighbourhood list.
    pub fn variable_neighbourhood_descent(problem: P, neighbourhoods: Vec<N>) -> Self {
        Search::new(
            "variable neighbourhood descent",
            problem,
            neighbourhoods,
            Box::new(VariableNeighbourhoodDescent::new()),
        )
    }

    /// Parallel tempering with a ladder of Metropolis replicas.
    pub fn parallel_tempering(
        problem: P,
        neighbourhood: N,
        num_replicas: usize,
        min_temperature: f64,
        max_temperature: f64,
        replica_steps: u64,
    ) -> Self {
        Search::new(
            "parallel tempering",
            problem,
            vec![neighbourhood],
            Box::new(ParallelTempering::<P::Solution>::new(
                num_replicas,
                min_temperature,
                max_temperature,
                replica_steps,
            )),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn problem(&self) -> &P {
        self.problem.as_ref()
    }

    pub fn status(&self) -> Status {
        self.control.status()
    }

    // --- lifecycle ------------------------------------------------------

    /// Runs the search on the calling thread until a stop criterion fires,
    /// `stop()` is called or the algorithm terminates the run, then returns
    /// the search to idle.
    ///
    /// Fails with [`SearchError::NotIdle`] when the search is already active
    /// and with [`SearchError::Init`] when the configuration is invalid, in
    /// which case the search is back to idle. Errors from the algorithm abort
    /// the run, restore idle and propagate.
    pub fn start(&self) -> Result<(), SearchError> {
        {
            let mut status = self.control.status.lock().unwrap();
            match *status {
                Status::Idle => *status = Status::Initializing,
                Status::Disposed => return Err(SearchError::Disposed),
                other => return Err(SearchError::NotIdle(other)),
            }
        }
        info!("{self}: search started");
        self.fire_status_changed(Status::Initializing);
        self.fire_search_started();
        self.control.begin_run();

        let mut algorithm = self.algorithm.lock().unwrap();
        if let Err(error) = self.initialize(algorithm.as_mut()) {
            warn!("{self}: initialization failed: {error}");
            self.enter_status(Status::Idle);
            return Err(error);
        }

        self.control.mark_running();
        self.enter_status(Status::Running);
        {
            let control = Arc::clone(&self.control);
            let listeners = Arc::clone(&self.listeners);
            self.checker.start_checking(
                Arc::clone(&self.control),
                Box::new(move || {
                    if control.request_stop() {
                        for (_, listener) in listeners.lock().unwrap().iter_mut() {
                            listener.status_changed(Status::Terminating);
                        }
                    }
                }),
            );
        }

        let result = self.run_loop(algorithm.as_mut());

        self.checker.stop_checking();
        self.control.mark_stopped();
        if self.control.request_stop() {
            // the loop aborted with an error while still running; keep the
            // observed status sequence on the state machine
            self.fire_status_changed(Status::Terminating);
        }
        self.fire_search_stopped();
        self.enter_status(Status::Idle);
        match &result {
            Ok(()) => info!(
                "{self}: search stopped after {} steps ({} ms, {} accepted, {} rejected)",
                self.steps(),
                self.runtime(),
                self.num_accepted_moves(),
                self.num_rejected_moves()
            ),
            Err(error) => warn!("{self}: search aborted: {error}"),
        }
        result
    }

    /// Requests cooperative termination of a running search. Idempotent, may
    /// be called from any thread; the loop exits before its next step.
    pub fn stop(&self) {
        if self.control.request_stop() {
            debug!("{self}: stop requested");
            self.fire_status_changed(Status::Terminating);
        }
    }

    /// Releases the search's resources. Only valid when idle; repeated calls
    /// on a disposed search succeed, every other operation fails afterwards.
    pub fn dispose(&self) -> Result<(), SearchError> {
        {
            let mut status = self.control.status.lock().unwrap();
            match *status {
                Status::Disposed => return Ok(()),
                Status::Idle => *status = Status::Disposed,
                other => return Err(SearchError::NotIdle(other)),
            }
        }
        self.checker.stop_checking();
        {
            let mut state = self.state.lock().unwrap();
            state.current = None;
            state.current_evaluation = None;
            state.current_validation = None;
            state.best = None;
            state.best_evaluation = None;
            state.cache.clear();
        }
        info!("{self}: search disposed");
        self.fire_status_changed(Status::Disposed);
        Ok(())
    }

    // --- configuration (idle only) --------------------------------------

    /// Registers a stop criterion. Requires an idle search.
    pub fn add_stop_criterion(
        &self,
        criterion: Arc<dyn StopCriterion>,
    ) -> Result<(), SearchError> {
        let _status = self.idle_guard()?;
        self.checker.add_criterion(criterion);
        Ok(())
    }

    /// Removes a previously added stop criterion, matched by identity.
    /// Requires an idle search.
    pub fn remove_stop_criterion(
        &self,
        criterion: &Arc<dyn StopCriterion>,
    ) -> Result<bool, SearchError> {
        let _status = self.idle_guard()?;
        Ok(self.checker.remove_criterion(criterion))
    }

    /// Registers all criteria described by a [`StopConditions`] value.
    /// Requires an idle search.
    pub fn add_stop_conditions(&self, conditions: &StopConditions) -> Result<(), SearchError> {
        let _status = self.idle_guard()?;
        for criterion in conditions.criteria() {
            self.checker.add_criterion(criterion);
        }
        Ok(())
    }

    /// Sets the period of the background stop-criterion checker. Requires an
    /// idle search; the period must be positive.
    pub fn set_stop_criterion_check_period(&self, period: Duration) -> Result<(), SearchError> {
        let _status = self.idle_guard()?;
        if period.is_zero() {
            warn!("{self}: rejected zero stop-criterion check period");
            return Err(SearchError::InvalidInput(
                "stop-criterion check period must be positive".into(),
            ));
        }
        self.checker.set_period(period);
        Ok(())
    }

    /// Registers a listener and returns a token for later removal. Requires
    /// an idle search.
    pub fn add_search_listener(
        &self,
        listener: Box<dyn SearchListener<P::Solution>>,
    ) -> Result<ListenerId, SearchError> {
        let _status = self.idle_guard()?;
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().unwrap().push((id, listener));
        Ok(id)
    }

    /// Removes a listener by its token. Requires an idle search.
    pub fn remove_search_listener(&self, id: ListenerId) -> Result<bool, SearchError> {
        let _status = self.idle_guard()?;
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        Ok(listeners.len() < before)
    }

    /// Replaces the evaluated-move cache. Requires an idle search.
    pub fn set_evaluated_move_cache(
        &self,
        cache: Box<dyn EvaluatedMoveCache<N::Move>>,
    ) -> Result<(), SearchError> {
        let _status = self.idle_guard()?;
        self.state.lock().unwrap().cache = cache;
        Ok(())
    }

    /// Reseeds the search's own random generator, which drives random
    /// initial solutions and neighbourhood sampling. Requires an idle search.
    pub fn set_random_seed(&self, seed: u64) -> Result<(), SearchError> {
        let _status = self.idle_guard()?;
        self.state.lock().unwrap().rng = StdRng::seed_from_u64(seed);
        Ok(())
    }

    /// Installs the current solution of the search. The solution is
    /// evaluated and validated immediately and becomes the new best solution
    /// when it is valid and improves on the incumbent. Requires an idle
    /// search.
    pub fn set_current_solution(&self, solution: P::Solution) -> Result<(), SearchError> {
        let status = self.idle_guard()?;
        let evaluation = self.problem.evaluate(&solution);
        let validation = self.problem.validate(&solution);
        let best_event = {
            let mut state = self.state.lock().unwrap();
            let state = &mut *state;
            state.cache.clear();
            state.current = Some(solution);
            state.current_evaluation = Some(evaluation);
            state.current_validation = Some(validation);
            if validation.is_passed() {
                self.update_best(state, evaluation)
            } else {
                None
            }
        };
        drop(status);
        if let Some((solution, evaluation)) = best_event {
            self.fire_new_best(&solution, &evaluation);
        }
        Ok(())
    }

    // --- getters ---------------------------------------------------------

    /// The best solution observed so far, cloned. Retained across runs.
    pub fn best_solution(&self) -> Option<P::Solution> {
        self.state.lock().unwrap().best.clone()
    }

    pub fn best_evaluation(&self) -> Option<Evaluation> {
        self.state.lock().unwrap().best_evaluation
    }

    /// The current working solution, cloned. Retained across runs.
    pub fn current_solution(&self) -> Option<P::Solution> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn current_evaluation(&self) -> Option<Evaluation> {
        self.state.lock().unwrap().current_evaluation
    }

    pub fn current_validation(&self) -> Option<Validation> {
        self.state.lock().unwrap().current_validation
    }

    /// Runtime of the current or last run in milliseconds, or
    /// [`UNAVAILABLE`].
    pub fn runtime(&self) -> i64 {
        duration_or_sentinel(self.control.snapshot().runtime)
    }

    /// Number of completed steps of the current or last run, or
    /// [`UNAVAILABLE`].
    pub fn steps(&self) -> i64 {
        count_or_sentinel(self.control.snapshot().steps)
    }

    /// Milliseconds since the best solution last improved, or
    /// [`UNAVAILABLE`].
    pub fn time_without_improvement(&self) -> i64 {
        duration_or_sentinel(self.control.snapshot().time_without_improvement)
    }

    /// Steps since the best solution last improved, or [`UNAVAILABLE`].
    pub fn steps_without_improvement(&self) -> i64 {
        count_or_sentinel(self.control.snapshot().steps_without_improvement)
    }

    /// Smallest strictly positive improvement of the best evaluation observed
    /// during the current or last run, or `-1.0` when none was observed.
    pub fn min_delta(&self) -> f64 {
        self.control.snapshot().min_delta.unwrap_or(-1.0)
    }

    /// Number of accepted moves in the current or last run, or
    /// [`UNAVAILABLE`].
    pub fn num_accepted_moves(&self) -> i64 {
        count_or_sentinel(self.control.snapshot().num_accepted_moves)
    }

    /// Number of rejected moves in the current or last run, or
    /// [`UNAVAILABLE`].
    pub fn num_rejected_moves(&self) -> i64 {
        count_or_sentinel(self.control.snapshot().num_rejected_moves)
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            steps: self.steps(),
            runtime_ms: self.runtime(),
            num_accepted_moves: self.num_accepted_moves(),
            num_rejected_moves: self.num_rejected_moves(),
            min_delta: self.min_delta(),
            best_evaluation: self.best_evaluation().map(|e| e.value()),
        }
    }

    // --- internals -------------------------------------------------------

    fn idle_guard(&self) -> Result<MutexGuard<'_, Status>, SearchError> {
        let status = self.control.status.lock().unwrap();
        match *status {
            Status::Idle => Ok(status),
            Status::Disposed => Err(SearchError::Disposed),
            other => Err(SearchError::NotIdle(other)),
        }
    }

    fn enter_status(&self, status: Status) {
        *self.control.status.lock().unwrap() = status;
        self.fire_status_changed(status);
    }

    fn initialize(&self, algorithm: &mut dyn Algorithm<P, N>) -> Result<(), SearchError> {
        if self.neighbourhoods.is_empty() {
            return Err(SearchError::Init("no neighbourhoods configured".into()));
        }
        algorithm.init()?;
        let best_event = {
            let mut state = self.state.lock().unwrap();
            let state = &mut *state;
            state.cache.clear();
            if state.current.is_none() {
                debug!("{self}: creating random initial solution");
                let solution = self.problem.random_solution(&mut state.rng);
                state.current_evaluation = Some(self.problem.evaluate(&solution));
                state.current_validation = Some(self.problem.validate(&solution));
                state.current = Some(solution);
            }
            let (Some(evaluation), Some(validation)) =
                (state.current_evaluation, state.current_validation)
            else {
                return Err(SearchError::Init(
                    "current solution has no evaluation".into(),
                ));
            };
            if validation.is_passed() {
                self.update_best(state, evaluation)
            } else {
                warn!("{self}: initial solution is rejected");
                None
            }
        };
        if let Some((solution, evaluation)) = best_event {
            self.fire_new_best(&solution, &evaluation);
        }
        Ok(())
    }

    fn run_loop(&self, algorithm: &mut dyn Algorithm<P, N>) -> Result<(), SearchError> {
        while self.control.status() == Status::Running {
            let mut context = SearchContext { search: self };
            algorithm.search_step(&mut context)?;
            let steps = self.control.note_step();
            debug!("{self}: completed step {steps}");
            self.fire_step_completed(steps);
            if self
                .checker
                .stop_criterion_satisfied(&self.control.snapshot())
            {
                self.stop();
            }
        }
        Ok(())
    }

    /// Replaces the best solution when `evaluation` strictly improves on the
    /// incumbent. Ties keep the incumbent. Returns the cloned payload for the
    /// new-best event when listeners are registered.
    ///
    /// Must be called with the state lock held and a valid (non-rejected)
    /// current solution.
    fn update_best(
        &self,
        state: &mut SearchState<P::Solution, N::Move>,
        evaluation: Evaluation,
    ) -> Option<(P::Solution, Evaluation)> {
        let objective = self.problem.objective();
        let delta = state
            .best_evaluation
            .map(|best| objective.delta(&evaluation, &best));
        if let Some(delta) = delta {
            if delta <= 0.0 {
                return None;
            }
        }
        self.control.note_improvement(delta);
        let candidate = state.current.as_ref().expect("current solution present");
        state.best = Some(candidate.clone());
        state.best_evaluation = Some(evaluation);
        debug!(
            "{self}: new best solution (evaluation {})",
            evaluation.value()
        );
        if self.listeners.lock().unwrap().is_empty() {
            None
        } else {
            Some((candidate.clone(), evaluation))
        }
    }

    fn fire_search_started(&self) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.search_started();
        }
    }

    fn fire_search_stopped(&self) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.search_stopped();
        }
    }

    fn fire_status_changed(&self, status: Status) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.status_changed(status);
        }
    }

    fn fire_step_completed(&self, steps: u64) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.step_completed(steps);
        }
    }

    fn fire_new_best(&self, solution: &P::Solution, evaluation: &Evaluation) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.new_best_solution(solution, evaluation);
        }
    }

    fn fire_modified_current_solution(&self, solution: &P::Solution, evaluation: &Evaluation) {
        for (_, listener) in self.listeners.lock().unwrap().iter_mut() {
            listener.modified_current_solution(solution, evaluation);
        }
    }
}

fn duration_or_sentinel(duration: Option<Duration>) -> i64 {
    duration.map_or(UNAVAILABLE, |d| d.as_millis() as i64)
}

fn count_or_sentinel(count: Option<u64>) -> i64 {
    count.map_or(UNAVAILABLE, |c| c as i64)
}

/// View of a running search handed to [`Algorithm::search_step`], exposing
/// the protected step primitives: move evaluation and validation through the
/// cache, acceptance with full bookkeeping, and cooperative stop.
pub struct SearchContext<'a, P: Problem, N: Neighbourhood<P::Solution>> {
    search: &'a Search<P, N>,
}

impl<'a, P: Problem, N: Neighbourhood<P::Solution>> SearchContext<'a, P, N> {
    pub fn problem(&self) -> &'a P {
        self.search.problem.as_ref()
    }

    pub fn objective(&self) -> Objective {
        self.search.problem.objective()
    }

    /// Oriented improvement of `new` over `old`; positive means better.
    pub fn delta(&self, new: &Evaluation, old: &Evaluation) -> f64 {
        self.objective().delta(new, old)
    }

    pub fn num_neighbourhoods(&self) -> usize {
        self.search.neighbourhoods.len()
    }

    pub(crate) fn neighbourhood(&self, index: usize) -> Option<&'a N> {
        self.search.neighbourhoods.get(index)
    }

    pub(crate) fn control(&self) -> &'a Arc<SearchControl> {
        &self.search.control
    }

    pub fn current_solution(&self) -> Option<P::Solution> {
        self.search.current_solution()
    }

    pub fn current_evaluation(&self) -> Option<Evaluation> {
        self.search.current_evaluation()
    }

    pub fn current_validation(&self) -> Option<Validation> {
        self.search.current_validation()
    }

    pub fn best_evaluation(&self) -> Option<Evaluation> {
        self.search.best_evaluation()
    }

    pub fn steps(&self) -> u64 {
        self.search.control.steps.load(Ordering::Relaxed)
    }

    /// Requests termination of the run; the loop exits before its next step.
    pub fn stop(&self) {
        self.search.stop();
    }

    /// Draws a random move from the given neighbourhood, using the search's
    /// own generator. `None` when the neighbourhood index is out of range or
    /// the legal move set is empty.
    pub fn random_move(&mut self, neighbourhood: usize) -> Option<N::Move> {
        let neighbourhood = self.search.neighbourhoods.get(neighbourhood)?;
        let mut state = self.search.state.lock().unwrap();
        let state = &mut *state;
        let current = state.current.as_ref()?;
        neighbourhood.random_move(current, &mut state.rng)
    }

    /// Enumerates all moves of the given neighbourhood for the current
    /// solution.
    pub fn all_moves(&self, neighbourhood: usize) -> Vec<N::Move> {
        let Some(neighbourhood) = self.search.neighbourhoods.get(neighbourhood) else {
            return Vec::new();
        };
        let state = self.search.state.lock().unwrap();
        match &state.current {
            Some(current) => neighbourhood.all_moves(current),
            None => Vec::new(),
        }
    }

    /// Evaluates a move against the current solution, consulting the cache
    /// first. On a miss the problem's delta evaluation is used when
    /// supported, otherwise the move is applied, evaluated and undone.
    pub fn evaluate_move(&mut self, mv: &N::Move) -> Evaluation {
        let mut state = self.search.state.lock().unwrap();
        cached_move_evaluation(self.search.problem.as_ref(), &mut state, mv)
    }

    /// Whether applying the move would yield a solution that fails mandatory
    /// validation. Cached like [`SearchContext::evaluate_move`].
    pub fn is_rejected_move(&mut self, mv: &N::Move) -> bool {
        let mut state = self.search.state.lock().unwrap();
        cached_move_rejection(self.search.problem.as_ref(), &mut state, mv)
    }

    /// Whether the move is valid and strictly improves the current solution.
    pub fn is_improvement(&mut self, mv: &N::Move) -> bool {
        let mut state = self.search.state.lock().unwrap();
        let state = &mut *state;
        if cached_move_rejection(self.search.problem.as_ref(), state, mv) {
            return false;
        }
        let Some(current_evaluation) = state.current_evaluation else {
            return false;
        };
        let evaluation = cached_move_evaluation(self.search.problem.as_ref(), state, mv);
        self.delta(&evaluation, &current_evaluation) > 0.0
    }

    /// Scans `moves` for the non-rejected move with the largest delta
    /// relative to the current solution, optionally restricted to strict
    /// improvements. Ties keep the first move encountered. The winner's
    /// evaluation and rejection are re-cached before returning, so a
    /// following [`SearchContext::accept_move`] hits the cache even with a
    /// single-entry implementation.
    pub fn move_with_largest_delta(
        &mut self,
        moves: &[N::Move],
        require_improvement: bool,
    ) -> Option<N::Move> {
        let problem = self.search.problem.as_ref();
        let mut state = self.search.state.lock().unwrap();
        let state = &mut *state;
        let current_evaluation = state.current_evaluation?;
        let mut best: Option<(usize, Evaluation, f64)> = None;
        for (index, mv) in moves.iter().enumerate() {
            if cached_move_rejection(problem, state, mv) {
                continue;
            }
            let evaluation = cached_move_evaluation(problem, state, mv);
            let delta = problem.objective().delta(&evaluation, &current_evaluation);
            if require_improvement && delta <= 0.0 {
                continue;
            }
            if best.as_ref().is_none_or(|(_, _, largest)| delta > *largest) {
                best = Some((index, evaluation, delta));
            }
        }
        let (index, evaluation, _) = best?;
        let winner = moves[index].clone();
        state.cache.put_evaluation(winner.clone(), evaluation);
        state.cache.put_rejection(winner.clone(), false);
        Some(winner)
    }

    /// Applies the move, runs `f` on the modified solution and undoes the
    /// move again. `None` when no current solution is set.
    pub fn with_applied<R>(&mut self, mv: &N::Move, f: impl FnOnce(&P::Solution) -> R) -> Option<R> {
        let mut state = self.search.state.lock().unwrap();
        let current = state.current.as_mut()?;
        mv.apply(current);
        let result = f(current);
        mv.undo(current);
        Some(result)
    }

    /// Accepts a move: applies it to the current solution, clears the cache,
    /// updates the current evaluation and validation, tracks the best
    /// solution, counts the acceptance and fires the current-solution event.
    pub fn accept_move(&mut self, mv: N::Move) {
        let search = self.search;
        let (best_event, modified_event) = {
            let mut state = search.state.lock().unwrap();
            let state = &mut *state;
            let evaluation = cached_move_evaluation(search.problem.as_ref(), state, &mv);
            let validation = full_move_validation(search.problem.as_ref(), state, &mv);
            {
                let current = state.current.as_mut().expect("current solution present");
                mv.apply(current);
            }
            state.cache.clear();
            state.current_evaluation = Some(evaluation);
            state.current_validation = Some(validation);
            let best_event = if validation.is_passed() {
                search.update_best(state, evaluation)
            } else {
                None
            };
            let has_listeners = !search.listeners.lock().unwrap().is_empty();
            let modified_event = if has_listeners {
                Some((
                    state.current.clone().expect("current solution present"),
                    evaluation,
                ))
            } else {
                None
            };
            (best_event, modified_event)
        };
        search.control.note_accepted();
        if let Some((solution, evaluation)) = best_event {
            search.fire_new_best(&solution, &evaluation);
        }
        if let Some((solution, evaluation)) = modified_event {
            search.fire_modified_current_solution(&solution, &evaluation);
        }
    }

    /// Rejects a move: only the rejected-move counter changes.
    pub fn reject_move(&mut self, _mv: &N::Move) {
        self.search.control.note_rejected();
    }

    /// Replaces the current solution wholesale, with best-solution tracking
    /// and the current-solution event but without touching the move
    /// counters. Used by algorithms that synchronize external state, such as
    /// replica-based searches, into the search.
    pub fn set_current_solution(
        &mut self,
        solution: P::Solution,
        evaluation: Evaluation,
        validation: Validation,
    ) {
        let search = self.search;
        let (best_event, modified_event) = {
            let mut state = search.state.lock().unwrap();
            let state = &mut *state;
            state.cache.clear();
            state.current = Some(solution);
            state.current_evaluation = Some(evaluation);
            state.current_validation = Some(validation);
            let best_event = if validation.is_passed() {
                search.update_best(state, evaluation)
            } else {
                None
            };
            let has_listeners = !search.listeners.lock().unwrap().is_empty();
            let modified_event = if has_listeners {
                Some((
                    state.current.clone().expect("current solution present"),
                    evaluation,
                ))
            } else {
                None
            };
            (best_event, modified_event)
        };
        if let Some((solution, evaluation)) = best_event {
            search.fire_new_best(&solution, &evaluation);
        }
        if let Some((solution, evaluation)) = modified_event {
            search.fire_modified_current_solution(&solution, &evaluation);
        }
    }
}

/// Cache-backed move evaluation. Must be called with the state lock held.
fn cached_move_evaluation<P, M>(
    problem: &P,
    state: &mut SearchState<P::Solution, M>,
    mv: &M,
) -> Evaluation
where
    P: Problem,
    M: Move<P::Solution>,
{
    if let Some(evaluation) = state.cache.evaluation(mv) {
        return evaluation;
    }
    let current_evaluation = state
        .current_evaluation
        .expect("current solution evaluated");
    let current = state.current.as_mut().expect("current solution present");
    let evaluation = match problem.evaluate_delta(mv, &*current, &current_evaluation) {
        Some(evaluation) => evaluation,
        None => {
            mv.apply(current);
            let evaluation = problem.evaluate(current);
            mv.undo(current);
            evaluation
        }
    };
    state.cache.put_evaluation(mv.clone(), evaluation);
    evaluation
}

/// Cache-backed move rejection. Must be called with the state lock held.
fn cached_move_rejection<P, M>(
    problem: &P,
    state: &mut SearchState<P::Solution, M>,
    mv: &M,
) -> bool
where
    P: Problem,
    M: Move<P::Solution>,
{
    if let Some(rejected) = state.cache.rejection(mv) {
        return rejected;
    }
    let rejected = !full_move_validation(problem, state, mv).is_passed();
    state.cache.put_rejection(mv.clone(), rejected);
    rejected
}

/// Full validation of a move, uncached. Must be called with the state lock
/// held.
fn full_move_validation<P, M>(
    problem: &P,
    state: &mut SearchState<P::Solution, M>,
    mv: &M,
) -> Validation
where
    P: Problem,
    M: Move<P::Solution>,
{
    let current_validation = state
        .current_validation
        .expect("current solution validated");
    let current = state.current.as_mut().expect("current solution present");
    match problem.validate_delta(mv, &*current, &current_validation) {
        Some(validation) => validation,
        None => {
            mv.apply(current);
            let validation = problem.validate(current);
            mv.undo(current);
            validation
        }
    }
}
