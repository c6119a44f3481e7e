use crate::engine::pool::VuPool;
use crate::types::{ExecutorKind, ScenarioConfig, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Target VU count at `elapsed` into the scenario.
///
/// `ramping-vus` interpolates linearly from the previous stage's target (or
/// `start_vus`) to the current one, flooring while ramping up and ceiling while
/// ramping down so the count never leaves the bounding targets. `constant-vus`
/// holds each stage's target for its whole duration. Past the last stage the
/// target is zero.
pub fn target_vus_at(kind: ExecutorKind, start_vus: u32, stages: &[Stage], elapsed: Duration) -> u32 {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            return match kind {
                ExecutorKind::ConstantVus => stage.target,
                ExecutorKind::RampingVus => {
                    interpolate(from, stage.target, elapsed - stage_start, stage.duration)
                }
            };
        }
        from = stage.target;
        stage_start = stage_end;
    }

    0
}

fn interpolate(from: u32, to: u32, into: Duration, length: Duration) -> u32 {
    if length.is_zero() {
        return to;
    }
    let progress = (into.as_secs_f64() / length.as_secs_f64()).clamp(0.0, 1.0);
    let exact = from as f64 + (to as f64 - from as f64) * progress;
    let rounded = if to >= from { exact.floor() } else { exact.ceil() };
    (rounded as u32).clamp(from.min(to), from.max(to))
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioOutcome {
    pub name: String,
    pub peak_running: u32,
    pub max_shortfall: u32,
    pub interrupted: u64,
}

/// Drives one scenario's VU pool along its stage profile.
pub struct RampScheduler {
    scenario: Arc<ScenarioConfig>,
    pool: VuPool,
    cancel_token: CancellationToken,
    target_tx: watch::Sender<u32>,
}

impl RampScheduler {
    pub fn new(
        scenario: Arc<ScenarioConfig>,
        pool: VuPool,
        cancel_token: CancellationToken,
    ) -> (Self, watch::Receiver<u32>) {
        let (target_tx, target_rx) = watch::channel(0);
        (
            Self {
                scenario,
                pool,
                cancel_token,
                target_tx,
            },
            target_rx,
        )
    }

    pub async fn run(mut self) -> ScenarioOutcome {
        let name = self.scenario.name.clone();
        let mut outcome = ScenarioOutcome {
            name: name.clone(),
            ..ScenarioOutcome::default()
        };

        if !self.scenario.start_time.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.scenario.start_time) => {}
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("Scenario {} cancelled before start", name);
                    return outcome;
                }
            }
        }

        tracing::info!(
            "Scenario {} starting ({}, {} stages, peak {} VUs)",
            name,
            self.scenario.executor.as_str(),
            self.scenario.stages.len(),
            self.scenario.peak_vus()
        );

        let total = self.scenario.stages_duration();
        let start = Instant::now();
        let mut ticker = interval(SCHEDULER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_shortfall = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("Scenario {} cancelled, ramping down", name);
                    break;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let target = target_vus_at(
                self.scenario.executor,
                self.scenario.start_vus,
                &self.scenario.stages,
                elapsed,
            );

            let start_error = self.pool.scale_to(target).err();
            let running = self.pool.running();
            let shortfall = target.saturating_sub(running);
            if shortfall != last_shortfall {
                if let Some(e) = start_error {
                    tracing::warn!(
                        "Scenario {}: only {} of {} VUs running: {}",
                        name,
                        running,
                        target,
                        e
                    );
                } else if shortfall == 0 {
                    tracing::info!("Scenario {}: VU shortfall recovered", name);
                }
                last_shortfall = shortfall;
            }

            outcome.peak_running = outcome.peak_running.max(running);
            outcome.max_shortfall = outcome.max_shortfall.max(shortfall);

            let _ = self.target_tx.send(target);
        }

        outcome.interrupted = self.pool.drain().await;
        let _ = self.target_tx.send(0);
        tracing::info!(
            "Scenario {} finished (peak {} VUs, {} interrupted iterations)",
            name,
            outcome.peak_running,
            outcome.interrupted
        );
        outcome
    }
}
