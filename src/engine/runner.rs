use crate::engine::aggregator::Aggregator;
use crate::engine::pool::VuPool;
use crate::engine::scheduler::{RampScheduler, SCHEDULER_TICK, ScenarioOutcome};
use crate::engine::thresholds::first_abort_failure;
use crate::engine::worker::ScenarioPlan;
use crate::engine::{AggregateMetrics, MetricsCollector, ThresholdReport, evaluate_thresholds};
use crate::error::RunError;
use crate::http::create_client;
use crate::types::{Observation, RunConfig, RunPhase, RunState, Threshold, ThresholdResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

const RESULT_CHANNEL_SIZE: usize = 10_000;
// Snapshot and abort-threshold cadence; VU gauges follow the scheduler tick
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub metrics: AggregateMetrics,
    pub thresholds: ThresholdReport,
    pub scenarios: Vec<ScenarioOutcome>,
    pub cancelled: bool,
    pub aborted_by: Option<ThresholdResult>,
}

impl RunOutcome {
    /// 0 when every non-informational threshold passed and nothing aborted
    /// the run, 4 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.thresholds.passed && self.aborted_by.is_none() { 0 } else { 4 }
    }
}

pub struct Engine {
    config: RunConfig,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<RunState>,
}

impl Engine {
    pub fn new(config: RunConfig) -> Self {
        let cancel_token = CancellationToken::new();
        let (state_tx, _) = watch::channel(RunState {
            max_vus: config.peak_vus(),
            ..RunState::default()
        });

        Self {
            config,
            cancel_token,
            state_tx,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn state_rx(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    fn set_phase(&self, phase: RunPhase) {
        tracing::info!("Run phase: {}", phase.as_str());
        self.state_tx.send_modify(|state| state.phase = phase);
    }

    pub async fn run(self) -> Result<RunOutcome, RunError> {
        let started = Instant::now();

        // Setup
        let capacity: u32 = self.config.scenarios.iter().map(|s| s.vu_capacity()).sum();
        let client = create_client(&self.config.http, capacity).map_err(RunError::Client)?;

        let collector = Arc::new(MetricsCollector::new(
            self.config.thresholds.iter().map(|t| t.metric.clone()),
        ));
        let (result_tx, result_rx) = mpsc::channel::<Observation>(RESULT_CHANNEL_SIZE);
        let aggregator_stop = CancellationToken::new();
        let aggregator_handle = tokio::spawn(
            Aggregator::new(collector.clone(), result_rx, aggregator_stop.clone()).run(),
        );

        let abort_thresholds = self.abort_thresholds();

        // Ramp
        self.set_phase(RunPhase::Ramp);
        let mut schedulers = JoinSet::new();
        let mut active_counters: Vec<Arc<AtomicU32>> = Vec::with_capacity(self.config.scenarios.len());
        let mut targets: Vec<watch::Receiver<u32>> = Vec::with_capacity(self.config.scenarios.len());

        for (index, scenario) in self.config.scenarios.iter().enumerate() {
            let scenario = Arc::new(scenario.clone());
            let plan = Arc::new(ScenarioPlan::new(&scenario));
            let pool = VuPool::new(
                plan,
                client.clone(),
                result_tx.clone(),
                self.cancel_token.clone(),
                scenario.vu_capacity(),
                scenario.graceful_ramp_down,
            );
            active_counters.push(pool.active_counter());

            let (scheduler, target_rx) =
                RampScheduler::new(scenario, pool, self.cancel_token.clone());
            targets.push(target_rx);
            schedulers.spawn(async move { (index, scheduler.run().await) });
        }
        drop(result_tx);

        let mut outcomes: Vec<(usize, ScenarioOutcome)> = Vec::with_capacity(self.config.scenarios.len());
        let mut aborted_by: Option<ThresholdResult> = None;
        let mut monitor = interval(SCHEDULER_TICK);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_snapshot = Instant::now();

        loop {
            tokio::select! {
                joined = schedulers.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => outcomes.push(outcome),
                        Some(Err(e)) => tracing::error!("Scheduler task failed: {}", e),
                        None => break,
                    }
                }

                _ = monitor.tick() => {
                    let active: u32 = active_counters
                        .iter()
                        .map(|c| c.load(Ordering::Relaxed))
                        .sum();
                    let target: u32 = targets.iter().map(|rx| *rx.borrow()).sum();
                    collector.set_vus(active);
                    self.state_tx.send_modify(|state| {
                        state.elapsed = started.elapsed();
                        state.target_vus = target;
                        state.active_vus = active;
                    });

                    if last_snapshot.elapsed() < MONITOR_INTERVAL {
                        continue;
                    }
                    last_snapshot = Instant::now();

                    let snapshot = collector.snapshot();
                    self.state_tx.send_modify(|state| {
                        state.requests = snapshot.totals.total_requests;
                        state.failed = snapshot.totals.failed;
                        state.iterations = snapshot.totals.iterations;
                    });

                    if aborted_by.is_none() {
                        if let Some(failure) = first_abort_failure(&abort_thresholds, &snapshot) {
                            tracing::warn!(
                                "Threshold {} {} crossed, aborting run",
                                failure.metric,
                                failure.condition
                            );
                            aborted_by = Some(failure);
                            self.cancel_token.cancel();
                        }
                    }
                }
            }
        }

        // Teardown
        self.set_phase(RunPhase::Teardown);
        outcomes.sort_by_key(|(index, _)| *index);
        let scenarios: Vec<ScenarioOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
        collector.add_interrupted(scenarios.iter().map(|s| s.interrupted).sum());
        collector.set_vus(0);

        aggregator_stop.cancel();
        aggregator_handle.await.map_err(RunError::Aggregator)?;

        let metrics = collector.snapshot();
        let thresholds = evaluate_thresholds(&self.config.thresholds, &metrics);
        let cancelled = self.cancel_token.is_cancelled() && aborted_by.is_none();

        self.state_tx.send_modify(|state| {
            state.elapsed = started.elapsed();
            state.target_vus = 0;
            state.active_vus = 0;
            state.requests = metrics.totals.total_requests;
            state.failed = metrics.totals.failed;
            state.iterations = metrics.totals.iterations;
        });
        self.set_phase(RunPhase::Done);

        Ok(RunOutcome {
            metrics,
            thresholds,
            scenarios,
            cancelled,
            aborted_by,
        })
    }

    /// Thresholds watched during the run. `fail_fast` promotes every
    /// non-informational threshold.
    fn abort_thresholds(&self) -> Vec<Threshold> {
        self.config
            .thresholds
            .iter()
            .filter(|t| !t.informational && (t.abort_on_fail || self.config.fail_fast))
            .cloned()
            .map(|mut t| {
                t.abort_on_fail = true;
                t
            })
            .collect()
    }
}
