use crate::engine::Stats;
use crate::engine::stats::ExactTrend;
use crate::types::{Aggregation, MetricSelector};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metrics the threshold evaluator understands, and how each one aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Rate,
    Counter,
    Trend,
    Gauge,
}

pub const KNOWN_METRICS: &[(&str, MetricKind)] = &[
    ("http_req_failed", MetricKind::Rate),
    ("checks", MetricKind::Rate),
    ("http_reqs", MetricKind::Counter),
    ("iterations", MetricKind::Counter),
    ("data_received", MetricKind::Counter),
    ("http_req_duration", MetricKind::Trend),
    ("iteration_duration", MetricKind::Trend),
    ("vus", MetricKind::Gauge),
    ("vus_max", MetricKind::Gauge),
];

pub fn metric_kind(name: &str) -> Option<MetricKind> {
    KNOWN_METRICS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

impl MetricKind {
    pub fn supports(&self, aggregation: Aggregation) -> bool {
        match self {
            MetricKind::Rate => matches!(aggregation, Aggregation::Rate),
            MetricKind::Counter => matches!(aggregation, Aggregation::Count | Aggregation::Rate),
            MetricKind::Trend => matches!(
                aggregation,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
            MetricKind::Gauge => matches!(aggregation, Aggregation::Value | Aggregation::Max),
        }
    }

    pub fn aggregations(&self) -> &'static str {
        match self {
            MetricKind::Rate => "rate",
            MetricKind::Counter => "count, rate",
            MetricKind::Trend => "avg, min, max, med, p(N)",
            MetricKind::Gauge => "value, max",
        }
    }
}

/// Point-in-time view of everything the collector has accumulated.
#[derive(Debug, Clone)]
pub struct AggregateMetrics {
    pub elapsed: Duration,
    pub vus: u32,
    pub vus_max: u32,
    pub interrupted_iterations: u64,
    pub totals: Stats,
    pub submetrics: BTreeMap<MetricSelector, Stats>,
}

impl AggregateMetrics {
    pub fn requests_per_sec(&self) -> f64 {
        per_second(self.totals.total_requests, self.elapsed)
    }

    pub fn iterations_per_sec(&self) -> f64 {
        per_second(self.totals.iterations, self.elapsed)
    }

    /// Resolve `aggregation` of `selector`. `None` means no value exists:
    /// unknown metric, undeclared sub-metric, or no data yet.
    pub fn value(&self, selector: &MetricSelector, aggregation: Aggregation) -> Option<f64> {
        let kind = metric_kind(&selector.name)?;
        if !kind.supports(aggregation) {
            return None;
        }

        let stats = if selector.is_submetric() {
            self.submetrics.get(selector)?
        } else {
            &self.totals
        };

        match selector.name.as_str() {
            "http_req_failed" => stats.error_rate(),
            "checks" => stats.check_pass_rate(),
            "http_reqs" => self.counter(stats.total_requests, aggregation),
            "iterations" => self.counter(stats.iterations, aggregation),
            "data_received" => self.counter(stats.bytes_received, aggregation),
            "http_req_duration" => trend_value(&stats.exact_req_duration(), aggregation),
            "iteration_duration" => trend_value(&stats.exact_iteration_duration(), aggregation),
            "vus" => match aggregation {
                Aggregation::Max => Some(self.vus_max as f64),
                _ => Some(self.vus as f64),
            },
            "vus_max" => Some(self.vus_max as f64),
            _ => None,
        }
    }

    fn counter(&self, count: u64, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Count => Some(count as f64),
            Aggregation::Rate => Some(per_second(count, self.elapsed)),
            _ => None,
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

fn trend_value(trend: &ExactTrend<'_>, aggregation: Aggregation) -> Option<f64> {
    match aggregation {
        Aggregation::Avg => trend.avg_ms(),
        Aggregation::Min => trend.min_ms(),
        Aggregation::Max => trend.max_ms(),
        Aggregation::Med => trend.percentile_ms(50.0),
        Aggregation::Percentile(p) => trend.percentile_ms(p),
        _ => None,
    }
}
