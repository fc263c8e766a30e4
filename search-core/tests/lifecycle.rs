//! Lifecycle, status-machine and metadata tests.

use search_core::{
    Evaluation, Objective, Search, SearchError, SearchListener, SingleSwapNeighbourhood, Status,
    StopConditions, SubsetProblem, SubsetSolution, UNAVAILABLE,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn small_problem() -> SubsetProblem {
    SubsetProblem::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], Objective::Maximize, 2).unwrap()
}

/// Records every lifecycle event it sees.
#[derive(Default)]
struct EventRecorder {
    statuses: Arc<Mutex<Vec<Status>>>,
    started: Arc<Mutex<u64>>,
    stopped: Arc<Mutex<u64>>,
    steps: Arc<Mutex<u64>>,
    best_evaluations: Arc<Mutex<Vec<f64>>>,
}

impl EventRecorder {
    fn listener(&self) -> Box<dyn SearchListener<SubsetSolution>> {
        Box::new(EventListener {
            statuses: Arc::clone(&self.statuses),
            started: Arc::clone(&self.started),
            stopped: Arc::clone(&self.stopped),
            steps: Arc::clone(&self.steps),
            best_evaluations: Arc::clone(&self.best_evaluations),
        })
    }
}

struct EventListener {
    statuses: Arc<Mutex<Vec<Status>>>,
    started: Arc<Mutex<u64>>,
    stopped: Arc<Mutex<u64>>,
    steps: Arc<Mutex<u64>>,
    best_evaluations: Arc<Mutex<Vec<f64>>>,
}

impl SearchListener<SubsetSolution> for EventListener {
    fn search_started(&mut self) {
        *self.started.lock().unwrap() += 1;
    }
    fn search_stopped(&mut self) {
        *self.stopped.lock().unwrap() += 1;
    }
    fn step_completed(&mut self, _steps: u64) {
        *self.steps.lock().unwrap() += 1;
    }
    fn status_changed(&mut self, status: Status) {
        self.statuses.lock().unwrap().push(status);
    }
    fn new_best_solution(&mut self, _solution: &SubsetSolution, evaluation: &Evaluation) {
        self.best_evaluations.lock().unwrap().push(evaluation.value());
    }
}

#[test]
fn a_run_walks_the_status_machine() {
    let search = Search::steepest_descent(small_problem(), SingleSwapNeighbourhood::new());
    let recorder = EventRecorder::default();
    search.add_search_listener(recorder.listener()).unwrap();

    search.start().expect("run should complete");

    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![
            Status::Initializing,
            Status::Running,
            Status::Terminating,
            Status::Idle
        ],
        "the observed status sequence must be a walk on the state machine"
    );
    assert_eq!(*recorder.started.lock().unwrap(), 1);
    assert_eq!(*recorder.stopped.lock().unwrap(), 1);
    assert!(*recorder.steps.lock().unwrap() > 0);

    let best = recorder.best_evaluations.lock().unwrap();
    assert!(!best.is_empty(), "the initial valid solution becomes best");
    assert!(
        best.windows(2).all(|pair| pair[1] > pair[0]),
        "best evaluations must strictly improve: {best:?}"
    );
}

#[test]
fn getters_return_sentinels_before_the_first_run() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());

    assert_eq!(search.status(), Status::Idle);
    assert_eq!(search.runtime(), UNAVAILABLE);
    assert_eq!(search.steps(), UNAVAILABLE);
    assert_eq!(search.time_without_improvement(), UNAVAILABLE);
    assert_eq!(search.steps_without_improvement(), UNAVAILABLE);
    assert_eq!(search.num_accepted_moves(), UNAVAILABLE);
    assert_eq!(search.num_rejected_moves(), UNAVAILABLE);
    assert_eq!(search.min_delta(), -1.0);
    assert!(search.best_solution().is_none());
    assert!(search.current_solution().is_none());
    assert!(search.current_evaluation().is_none());
}

#[test]
fn metadata_is_meaningful_after_a_run_and_reset_on_restart() {
    let search = Search::steepest_descent(small_problem(), SingleSwapNeighbourhood::new());
    search.start().expect("first run should complete");

    assert!(search.runtime() >= 0);
    let first_steps = search.steps();
    assert!(first_steps >= 1);
    assert!(search.num_accepted_moves() >= 0);
    assert!(search.min_delta() > 0.0 || search.num_accepted_moves() == 0);

    // the second run starts at a local optimum and stops after one step
    search.start().expect("second run should complete");
    assert_eq!(search.steps(), 1, "per-run metadata is reset at run start");
    assert_eq!(search.num_accepted_moves(), 0);
    assert_eq!(search.min_delta(), -1.0);

    let stats = search.stats();
    assert_eq!(stats.steps, 1);
    assert_eq!(stats.best_evaluation, Some(7.0));
    serde_json::to_string(&stats).expect("stats serialize to JSON");
}

#[test]
fn stop_is_callable_from_another_thread() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
    // no stop criteria: only the external stop call ends this run
    thread::scope(|scope| {
        let runner = scope.spawn(|| search.start());
        while search.status() != Status::Running {
            thread::sleep(Duration::from_millis(1));
        }
        search.stop();
        runner.join().unwrap().expect("run should complete");
    });
    assert_eq!(search.status(), Status::Idle);
    // a stop on an idle search is a no-op
    search.stop();
    assert_eq!(search.status(), Status::Idle);
}

#[test]
fn max_runtime_terminates_within_the_stop_bound() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
    search
        .set_stop_criterion_check_period(Duration::from_millis(25))
        .unwrap();
    search
        .add_stop_conditions(&StopConditions {
            max_runtime_ms: Some(100),
            ..Default::default()
        })
        .unwrap();

    let started = Instant::now();
    search.start().expect("run should complete");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(
        elapsed < Duration::from_secs(1),
        "termination must follow the runtime limit promptly, took {elapsed:?}"
    );
}

#[test]
fn mutating_operations_require_an_idle_search() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
    search
        .add_stop_conditions(&StopConditions {
            max_runtime_ms: Some(200),
            ..Default::default()
        })
        .unwrap();

    thread::scope(|scope| {
        let runner = scope.spawn(|| search.start());
        while search.status() != Status::Running {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(search.dispose(), Err(SearchError::NotIdle(_))));
        assert!(matches!(
            search.add_stop_conditions(&StopConditions::default()),
            Err(SearchError::NotIdle(_))
        ));
        assert!(matches!(
            search.set_stop_criterion_check_period(Duration::from_secs(1)),
            Err(SearchError::NotIdle(_))
        ));
        assert!(matches!(
            search.start(),
            Err(SearchError::NotIdle(Status::Running))
        ));
        runner.join().unwrap().expect("run should complete");
    });
}

#[test]
fn disposal_is_terminal() {
    let search = Search::steepest_descent(small_problem(), SingleSwapNeighbourhood::new());
    search.start().expect("run should complete");

    search.dispose().expect("disposing an idle search succeeds");
    assert_eq!(search.status(), Status::Disposed);
    search.dispose().expect("repeated disposal is a no-op");

    assert!(matches!(search.start(), Err(SearchError::Disposed)));
    assert!(matches!(
        search.set_current_solution(SubsetSolution::new(0..5)),
        Err(SearchError::Disposed)
    ));
    assert!(matches!(
        search.add_stop_conditions(&StopConditions::default()),
        Err(SearchError::Disposed)
    ));
    assert!(search.best_solution().is_none(), "resources are released");
    assert_eq!(search.runtime(), UNAVAILABLE);
}

#[test]
fn initialization_failures_restore_idle() {
    // no neighbourhoods
    let search = Search::variable_neighbourhood_descent(
        small_problem(),
        Vec::<SingleSwapNeighbourhood>::new(),
    );
    assert!(matches!(search.start(), Err(SearchError::Init(_))));
    assert_eq!(search.status(), Status::Idle);

    // invalid algorithm configuration
    let search = Search::tabu_search(small_problem(), SingleSwapNeighbourhood::new(), 0);
    assert!(matches!(search.start(), Err(SearchError::Init(_))));
    assert_eq!(search.status(), Status::Idle);

    let search = Search::parallel_tempering(
        small_problem(),
        SingleSwapNeighbourhood::new(),
        4,
        0.0,
        1.0,
        10,
    );
    assert!(matches!(search.start(), Err(SearchError::Init(_))));
    assert_eq!(search.status(), Status::Idle);
}

#[test]
fn check_period_must_be_positive() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
    assert!(matches!(
        search.set_stop_criterion_check_period(Duration::ZERO),
        Err(SearchError::InvalidInput(_))
    ));
    search
        .set_stop_criterion_check_period(Duration::from_millis(10))
        .unwrap();
}

#[test]
fn listeners_and_criteria_can_be_removed_while_idle() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());

    let recorder = EventRecorder::default();
    let id = search.add_search_listener(recorder.listener()).unwrap();
    assert!(search.remove_search_listener(id).unwrap());
    assert!(!search.remove_search_listener(id).unwrap());

    let criterion: Arc<dyn search_core::StopCriterion> =
        Arc::new(search_core::MaxSteps(10));
    search.add_stop_criterion(Arc::clone(&criterion)).unwrap();
    assert!(search.remove_stop_criterion(&criterion).unwrap());
    assert!(!search.remove_stop_criterion(&criterion).unwrap());
}

#[test]
fn seeded_searches_are_reproducible() {
    let run = || {
        let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
        search.set_random_seed(1234).unwrap();
        search
            .add_stop_conditions(&StopConditions {
                max_steps: Some(50),
                ..Default::default()
            })
            .unwrap();
        search.start().expect("run should complete");
        (
            search.current_solution().unwrap(),
            search.best_evaluation().unwrap().value(),
        )
    };
    let (first_solution, first_best) = run();
    let (second_solution, second_best) = run();
    assert_eq!(first_solution, second_solution);
    assert_eq!(first_best, second_best);
}

#[test]
fn rejected_initial_solutions_never_become_best() {
    let search = Search::random_descent(small_problem(), SingleSwapNeighbourhood::new());
    // selection size 1 violates the mandatory fixed-size constraint
    search
        .set_current_solution(SubsetSolution::with_selection(0..5, [0]))
        .unwrap();
    assert!(search.best_solution().is_none());
    assert!(!search.current_validation().unwrap().is_passed());
}
