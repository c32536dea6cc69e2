use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::evaluator::evaluate;
use super::executor::ProbeExecutor;
use super::sink::{AlertStatus, ResultSink};
use super::validation::validate_check;
use crate::store::{CHECKS, RecordStore, StoreError};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub max_concurrent_probes: usize,
    pub max_timeout_seconds: u64,
}

/// What the scheduler is doing, taken over every cycle that is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Listing,
    /// Number of pipelines still running
    Dispatching(usize),
}

/// Work in progress across overlapping cycles
#[derive(Debug, Default)]
struct Activity {
    listing: usize,
    pipelines: usize,
}

impl Activity {
    fn state(&self) -> SchedulerState {
        if self.pipelines > 0 {
            SchedulerState::Dispatching(self.pipelines)
        } else if self.listing > 0 {
            SchedulerState::Listing
        } else {
            SchedulerState::Idle
        }
    }
}

/// Check ids with a pipeline currently running
#[derive(Debug, Default)]
pub struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Mark `id` as in flight, or `None` if it already is
    pub fn acquire(self: &Arc<Self>, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard { registry: Arc::clone(self), id: id.to_string() })
    }

    #[allow(dead_code)] // Public API method
    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).contains(id)
    }
}

/// Clears the in-flight marker when the pipeline ends, even on panic
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlight>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.ids.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

/// How a single check's pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
    Evaluated { alert: AlertStatus, stored: bool },
    Invalid,
    Failed,
}

/// Tally of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub evaluated: usize,
    pub invalid: usize,
    pub skipped_in_flight: usize,
    pub failed: usize,
    pub alerts_sent: usize,
}

impl CycleReport {
    fn add(&mut self, result: PipelineResult) {
        match result {
            PipelineResult::Evaluated { alert, stored } => {
                self.evaluated += 1;
                if !stored {
                    self.failed += 1;
                }
                if alert == AlertStatus::Sent {
                    self.alerts_sent += 1;
                }
            }
            PipelineResult::Invalid => self.invalid += 1,
            PipelineResult::Failed => self.failed += 1,
        }
    }
}

/// Check scheduler - probes every stored check once per cycle
pub struct CheckScheduler {
    store: Arc<dyn RecordStore>,
    executor: Arc<ProbeExecutor>,
    sink: Arc<ResultSink>,
    config: SchedulerConfig,
    in_flight: Arc<InFlight>,
    permits: Arc<Semaphore>,
    activity: Mutex<Activity>,
    state: watch::Sender<SchedulerState>,
}

impl CheckScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        executor: Arc<ProbeExecutor>,
        sink: Arc<ResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            store,
            executor,
            sink,
            config,
            in_flight: Arc::default(),
            permits,
            activity: Mutex::default(),
            state,
        }
    }

    #[allow(dead_code)] // Public API method
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Apply `change` and publish the resulting state
    fn track(&self, change: impl FnOnce(&mut Activity)) {
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut activity);
        self.state.send_replace(activity.state());
    }

    /// Verify the store is reachable and start cycling in the background.
    ///
    /// An unreachable store is the only error this returns; once running the
    /// scheduler never stops on its own.
    pub async fn start(self: Arc<Self>) -> Result<tokio::task::JoinHandle<()>, StoreError> {
        let ids = self.store.list(CHECKS).await?;
        info!("Store reachable, {} checks registered", ids.len());

        Ok(tokio::spawn(self.run()))
    }

    /// Tick forever: once immediately, then every interval
    async fn run(self: Arc<Self>) {
        let mut timer = interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            // A cycle that overruns the interval keeps going while the next
            // one starts; the in-flight set keeps them off the same checks
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = scheduler.run_once().await {
                    error!("Failed to list checks, skipping cycle: {}", e);
                }
            });
        }
    }

    /// Run a single cycle over every stored check.
    ///
    /// Only a failure to list the checks is returned; everything that goes
    /// wrong for a single check is counted in the report.
    pub async fn run_once(&self) -> Result<CycleReport, StoreError> {
        let mut report = CycleReport::default();

        self.track(|a| a.listing += 1);
        let ids = match self.store.list(CHECKS).await {
            Ok(ids) => ids,
            Err(e) => {
                self.track(|a| a.listing -= 1);
                return Err(e);
            }
        };
        report.listed = ids.len();

        let mut pipelines = JoinSet::new();
        for id in ids {
            let Some(guard) = self.in_flight.acquire(&id) else {
                debug!(check_id = %id, "Previous pipeline still running, skipping this cycle");
                report.skipped_in_flight += 1;
                continue;
            };

            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            let sink = Arc::clone(&self.sink);
            let permits = Arc::clone(&self.permits);
            let max_timeout_seconds = self.config.max_timeout_seconds;

            pipelines.spawn(async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return PipelineResult::Failed;
                };
                run_pipeline(store.as_ref(), &executor, &sink, &id, max_timeout_seconds).await
            });
        }

        let dispatched = pipelines.len();
        self.track(|a| {
            a.listing -= 1;
            a.pipelines += dispatched;
        });

        while let Some(joined) = pipelines.join_next().await {
            self.track(|a| a.pipelines -= 1);
            match joined {
                Ok(result) => report.add(result),
                Err(e) => {
                    error!("Check pipeline aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            listed = report.listed,
            evaluated = report.evaluated,
            invalid = report.invalid,
            skipped = report.skipped_in_flight,
            failed = report.failed,
            alerts = report.alerts_sent,
            "Check cycle completed"
        );

        Ok(report)
    }
}

/// read → validate → probe → evaluate → record, for one check
async fn run_pipeline(
    store: &dyn RecordStore,
    executor: &ProbeExecutor,
    sink: &ResultSink,
    id: &str,
    max_timeout_seconds: u64,
) -> PipelineResult {
    let raw = match store.read(CHECKS, id).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(check_id = %id, "Failed to read check: {}", e);
            return PipelineResult::Failed;
        }
    };

    let check = match validate_check(&raw, max_timeout_seconds) {
        Ok(check) if check.id == id => check,
        Ok(check) => {
            warn!(check_id = %id, "Check record carries mismatched id '{}', skipping", check.id);
            return PipelineResult::Invalid;
        }
        Err(e) => {
            warn!(check_id = %id, "Invalid check record, skipping: {}", e);
            return PipelineResult::Invalid;
        }
    };

    let outcome = executor.probe(&check).await;
    let evaluation = evaluate(&check, &outcome);
    debug!(
        check_id = %id,
        target = %check.target(),
        outcome = %outcome,
        state = %evaluation.state,
        "Check probed"
    );

    let report = sink.record(&check, evaluation, chrono::Utc::now().timestamp_millis()).await;

    PipelineResult::Evaluated { alert: report.alert, stored: report.stored }
}
