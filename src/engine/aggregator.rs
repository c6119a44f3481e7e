use crate::engine::MetricsCollector;
use crate::types::Observation;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Moves observations from the VU channel into the collector.
///
/// Detached VUs may hold a sender long after the run ends, so the loop stops on
/// its own token rather than waiting for the channel to close. Whatever is
/// already buffered at that point is still recorded.
pub struct Aggregator {
    collector: Arc<MetricsCollector>,
    result_rx: mpsc::Receiver<Observation>,
    stop: CancellationToken,
}

impl Aggregator {
    pub fn new(
        collector: Arc<MetricsCollector>,
        result_rx: mpsc::Receiver<Observation>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            collector,
            result_rx,
            stop,
        }
    }

    /// Returns the number of observations recorded.
    pub async fn run(mut self) -> u64 {
        let mut recorded = 0u64;

        loop {
            tokio::select! {
                biased;

                observation = self.result_rx.recv() => {
                    match observation {
                        Some(observation) => {
                            self.collector.record_observation(observation);
                            recorded += 1;
                        }
                        None => break,
                    }
                }

                _ = self.stop.cancelled() => {
                    while let Ok(observation) = self.result_rx.try_recv() {
                        self.collector.record_observation(observation);
                        recorded += 1;
                    }
                    break;
                }
            }
        }

        tracing::debug!("Aggregator stopped after {} observations", recorded);
        recorded
    }
}
