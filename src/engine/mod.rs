mod aggregator;
mod collector;
mod pool;
mod runner;
mod scheduler;
mod snapshot;
mod stats;
mod thresholds;
mod worker;

pub use collector::MetricsCollector;
pub use runner::{Engine, RunOutcome};
pub use snapshot::AggregateMetrics;
pub use stats::{Stats, Trend};
pub use thresholds::{
    ThresholdReport, evaluate_thresholds, parse_expr, parse_selector, print_threshold_results,
};
