use crate::types::{RunPhase, RunState};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub fn format_progress(state: &RunState, scheduled: Duration) -> String {
    let error_pct = if state.requests > 0 {
        state.failed as f64 / state.requests as f64 * 100.0
    } else {
        0.0
    };
    format!(
        "[{:>5.1}s/{:.0}s] {:<8} vus {:>4}/{:<4} (peak {}) reqs {:>8} failed {:>6} ({:.2}%) iters {:>8}",
        state.elapsed.as_secs_f64(),
        scheduled.as_secs_f64(),
        state.phase.as_str(),
        state.active_vus,
        state.target_vus,
        state.max_vus,
        state.requests,
        state.failed,
        error_pct,
        state.iterations
    )
}

/// Writes one progress line per second to stderr until the run is done.
pub async fn run_progress(mut state_rx: watch::Receiver<RunState>, scheduled: Duration) {
    let mut ticker = interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if state_rx.borrow().phase != RunPhase::Done {
                    continue;
                }
            }
        }

        let state = state_rx.borrow().clone();
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", format_progress(&state, scheduled));
        if state.phase == RunPhase::Done {
            break;
        }
    }
}
