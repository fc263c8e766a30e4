//! Stop criteria and the background stop-criterion checker.
//!
//! A stop criterion is a predicate over a search's live metadata that
//! requests termination. Criteria never touch the search object itself; they
//! read a [`SearchSnapshot`], plain data captured from the search's shared
//! counters, which makes a single criterion instance safe to share across
//! several concurrently running searches.

use crate::search::{SearchControl, Status};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Point-in-time view of a search's metadata, as read by stop criteria.
///
/// Fields are `None` when they are not meaningful in the current status, for
/// example before the first run or while initializing.
#[derive(Debug, Clone)]
pub struct SearchSnapshot {
    pub status: Status,
    pub runtime: Option<Duration>,
    pub steps: Option<u64>,
    pub time_without_improvement: Option<Duration>,
    pub steps_without_improvement: Option<u64>,
    pub min_delta: Option<f64>,
    pub num_accepted_moves: Option<u64>,
    pub num_rejected_moves: Option<u64>,
}

/// A predicate over a search's live metadata that requests termination.
pub trait StopCriterion: Send + Sync {
    fn should_stop(&self, search: &SearchSnapshot) -> bool;
}

/// Stops the search after a maximum runtime.
#[derive(Debug, Clone, Copy)]
pub struct MaxRuntime(pub Duration);

impl StopCriterion for MaxRuntime {
    fn should_stop(&self, search: &SearchSnapshot) -> bool {
        search.runtime.is_some_and(|runtime| runtime >= self.0)
    }
}

/// Stops the search after a maximum number of steps.
#[derive(Debug, Clone, Copy)]
pub struct MaxSteps(pub u64);

impl StopCriterion for MaxSteps {
    fn should_stop(&self, search: &SearchSnapshot) -> bool {
        search.steps.is_some_and(|steps| steps >= self.0)
    }
}

/// Stops the search when the best solution has not improved for the given
/// amount of time.
#[derive(Debug, Clone, Copy)]
pub struct MaxTimeWithoutImprovement(pub Duration);

impl StopCriterion for MaxTimeWithoutImprovement {
    fn should_stop(&self, search: &SearchSnapshot) -> bool {
        search
            .time_without_improvement
            .is_some_and(|time| time >= self.0)
    }
}

/// Stops the search when the best solution has not improved for the given
/// number of steps.
#[derive(Debug, Clone, Copy)]
pub struct MaxStepsWithoutImprovement(pub u64);

impl StopCriterion for MaxStepsWithoutImprovement {
    fn should_stop(&self, search: &SearchSnapshot) -> bool {
        search
            .steps_without_improvement
            .is_some_and(|steps| steps >= self.0)
    }
}

/// Stops the search when the smallest observed improvement of the best
/// solution drops below the given threshold.
#[derive(Debug, Clone, Copy)]
pub struct MinDelta(pub f64);

impl StopCriterion for MinDelta {
    fn should_stop(&self, search: &SearchSnapshot) -> bool {
        search.min_delta.is_some_and(|delta| delta < self.0)
    }
}

/// Declarative stop-condition configuration, convertible into criteria.
///
/// All fields are optional; the search stops when the first configured
/// condition is met.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopConditions {
    /// Maximum wall-clock runtime in milliseconds.
    #[serde(default)]
    pub max_runtime_ms: Option<u64>,
    /// Maximum number of search steps.
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Maximum time without improvement of the best solution, in
    /// milliseconds.
    #[serde(default)]
    pub max_time_without_improvement_ms: Option<u64>,
    /// Maximum number of steps without improvement of the best solution.
    #[serde(default)]
    pub max_steps_without_improvement: Option<u64>,
    /// Minimum improvement of the best solution; smaller improvements stop
    /// the search.
    #[serde(default)]
    pub min_delta: Option<f64>,
}

impl StopConditions {
    /// Converts the configured conditions into stop criteria.
    pub fn criteria(&self) -> Vec<Arc<dyn StopCriterion>> {
        let mut criteria: Vec<Arc<dyn StopCriterion>> = Vec::new();
        if let Some(ms) = self.max_runtime_ms {
            criteria.push(Arc::new(MaxRuntime(Duration::from_millis(ms))));
        }
        if let Some(steps) = self.max_steps {
            criteria.push(Arc::new(MaxSteps(steps)));
        }
        if let Some(ms) = self.max_time_without_improvement_ms {
            criteria.push(Arc::new(MaxTimeWithoutImprovement(Duration::from_millis(
                ms,
            ))));
        }
        if let Some(steps) = self.max_steps_without_improvement {
            criteria.push(Arc::new(MaxStepsWithoutImprovement(steps)));
        }
        if let Some(delta) = self.min_delta {
            criteria.push(Arc::new(MinDelta(delta)));
        }
        criteria
    }
}

/// Default period between two background checks.
pub const DEFAULT_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// Periodic background checker owned by a search.
///
/// While the search is running, a single background thread wakes up every
/// check period, evaluates all registered criteria against a fresh snapshot
/// and requests a stop on the first satisfied criterion. The search loop
/// additionally polls [`StopCriterionChecker::stop_criterion_satisfied`] at
/// every step for immediate reaction independent of the period.
pub struct StopCriterionChecker {
    criteria: Arc<Mutex<Vec<Arc<dyn StopCriterion>>>>,
    period: Mutex<Duration>,
    worker: Mutex<Option<CheckerWorker>>,
}

struct CheckerWorker {
    cancel: Arc<(Mutex<bool>, Condvar)>,
    thread: JoinHandle<()>,
}

impl StopCriterionChecker {
    pub(crate) fn new() -> Self {
        StopCriterionChecker {
            criteria: Arc::new(Mutex::new(Vec::new())),
            period: Mutex::new(DEFAULT_CHECK_PERIOD),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn add_criterion(&self, criterion: Arc<dyn StopCriterion>) {
        self.criteria.lock().unwrap().push(criterion);
    }

    /// Removes a previously added criterion, matched by identity. Returns
    /// whether it was present.
    pub(crate) fn remove_criterion(&self, criterion: &Arc<dyn StopCriterion>) -> bool {
        let mut criteria = self.criteria.lock().unwrap();
        let before = criteria.len();
        criteria.retain(|c| !Arc::ptr_eq(c, criterion));
        criteria.len() < before
    }

    pub(crate) fn set_period(&self, period: Duration) {
        *self.period.lock().unwrap() = period;
    }

    pub fn period(&self) -> Duration {
        *self.period.lock().unwrap()
    }

    /// Synchronous poll used by the search loop at each step.
    pub(crate) fn stop_criterion_satisfied(&self, snapshot: &SearchSnapshot) -> bool {
        self.criteria
            .lock()
            .unwrap()
            .iter()
            .any(|criterion| criterion.should_stop(snapshot))
    }

    /// Spawns the background checker. A no-op when no criteria are
    /// registered or when checking is already active.
    pub(crate) fn start_checking(
        &self,
        control: Arc<SearchControl>,
        on_stop: Box<dyn Fn() + Send>,
    ) {
        if self.criteria.lock().unwrap().is_empty() {
            return;
        }
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        let cancel = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_cancel = Arc::clone(&cancel);
        let criteria = Arc::clone(&self.criteria);
        let period = *self.period.lock().unwrap();
        let thread = thread::Builder::new()
            .name("stop-criterion-checker".into())
            .spawn(move || {
                debug!("stop criterion checker started (period {period:?})");
                let (lock, condvar) = &*thread_cancel;
                let mut cancelled = lock.lock().unwrap();
                loop {
                    let (guard, _) = condvar.wait_timeout(cancelled, period).unwrap();
                    cancelled = guard;
                    if *cancelled {
                        break;
                    }
                    let snapshot = control.snapshot();
                    let satisfied = criteria
                        .lock()
                        .unwrap()
                        .iter()
                        .any(|criterion| criterion.should_stop(&snapshot));
                    if satisfied {
                        info!("stop criterion satisfied, requesting search stop");
                        on_stop();
                        break;
                    }
                }
                debug!("stop criterion checker stopped");
            })
            .expect("failed to spawn stop-criterion checker thread");
        *worker = Some(CheckerWorker { cancel, thread });
    }

    /// Requests cancellation of the background checker and joins it.
    /// Idempotent; completes before the owning search returns to idle.
    pub(crate) fn stop_checking(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(CheckerWorker { cancel, thread }) = worker {
            let (lock, condvar) = &*cancel;
            *lock.lock().unwrap() = true;
            condvar.notify_all();
            let _ = thread.join();
        }
    }
}

impl Drop for StopCriterionChecker {
    fn drop(&mut self) {
        self.stop_checking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SearchSnapshot {
        SearchSnapshot {
            status: Status::Running,
            runtime: Some(Duration::from_millis(500)),
            steps: Some(120),
            time_without_improvement: Some(Duration::from_millis(80)),
            steps_without_improvement: Some(20),
            min_delta: Some(0.5),
            num_accepted_moves: Some(100),
            num_rejected_moves: Some(20),
        }
    }

    #[test]
    fn criteria_fire_on_their_thresholds() {
        let s = snapshot();
        assert!(MaxRuntime(Duration::from_millis(500)).should_stop(&s));
        assert!(!MaxRuntime(Duration::from_millis(501)).should_stop(&s));
        assert!(MaxSteps(100).should_stop(&s));
        assert!(!MaxSteps(121).should_stop(&s));
        assert!(MaxTimeWithoutImprovement(Duration::from_millis(50)).should_stop(&s));
        assert!(MaxStepsWithoutImprovement(20).should_stop(&s));
        assert!(!MaxStepsWithoutImprovement(21).should_stop(&s));
        assert!(MinDelta(1.0).should_stop(&s));
        assert!(!MinDelta(0.5).should_stop(&s));
    }

    #[test]
    fn criteria_never_fire_without_meaningful_metadata() {
        let empty = SearchSnapshot {
            status: Status::Idle,
            runtime: None,
            steps: None,
            time_without_improvement: None,
            steps_without_improvement: None,
            min_delta: None,
            num_accepted_moves: None,
            num_rejected_moves: None,
        };
        assert!(!MaxRuntime(Duration::ZERO).should_stop(&empty));
        assert!(!MaxSteps(0).should_stop(&empty));
        assert!(!MaxTimeWithoutImprovement(Duration::ZERO).should_stop(&empty));
        assert!(!MaxStepsWithoutImprovement(0).should_stop(&empty));
        assert!(!MinDelta(f64::MAX).should_stop(&empty));
    }

    #[test]
    fn stop_conditions_convert_to_criteria() {
        let conditions = StopConditions {
            max_runtime_ms: Some(100),
            max_steps: Some(1000),
            min_delta: Some(0.001),
            ..Default::default()
        };
        let criteria = conditions.criteria();
        assert_eq!(criteria.len(), 3);

        let s = snapshot();
        assert!(criteria.iter().any(|c| c.should_stop(&s)));
    }

    #[test]
    fn stop_conditions_parse_from_json() {
        let parsed: StopConditions =
            serde_json::from_str(r#"{"max_steps": 500, "min_delta": 0.001}"#)
                .expect("stop conditions should parse");
        assert_eq!(parsed.max_steps, Some(500));
        assert_eq!(parsed.min_delta, Some(0.001));
        assert_eq!(parsed.max_runtime_ms, None);
        assert_eq!(parsed.criteria().len(), 2);
    }
}
