use crate::types::{CheckOutcome, CheckStats, ErrorKind, IterationSample, Sample, TimelineBucket};
use hdrhistogram::Histogram;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Accumulated metrics for one sample stream (the whole run, or one sub-metric).
#[derive(Debug, Clone)]
pub struct Stats {
    req_duration: Histogram<u64>,
    iteration_duration: Histogram<u64>,
    // Raw microsecond values; thresholds are judged on these, not on histogram buckets
    req_latencies: Vec<u64>,
    iteration_latencies: Vec<u64>,
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub bytes_received: u64,
    pub iterations: u64,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<ErrorKind, u64>,
    pub checks: BTreeMap<String, CheckStats>,
    pub timeline: Vec<TimelineBucket>,
    origin_us: u64,
}

fn new_histogram() -> Histogram<u64> {
    // 3 significant digits is a valid precision, creation cannot fail
    let mut histogram = Histogram::<u64>::new(3).expect("valid histogram precision");
    histogram.auto(true);
    histogram
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl Stats {
    pub fn new(origin_us: u64) -> Self {
        Self {
            req_duration: new_histogram(),
            iteration_duration: new_histogram(),
            req_latencies: Vec::new(),
            iteration_latencies: Vec::new(),
            total_requests: 0,
            successful: 0,
            failed: 0,
            bytes_received: 0,
            iterations: 0,
            status_codes: HashMap::new(),
            errors: HashMap::new(),
            checks: BTreeMap::new(),
            timeline: Vec::new(),
            origin_us,
        }
    }

    pub fn record(&mut self, sample: &Sample) {
        self.total_requests += 1;
        self.bytes_received += sample.bytes_received;
        let latency = micros(sample.latency);
        let _ = self.req_duration.record(latency);
        self.req_latencies.push(latency);

        let failed = sample.is_failed();
        if failed {
            self.failed += 1;
        } else {
            self.successful += 1;
        }

        if let Some(status) = sample.status {
            *self.status_codes.entry(status).or_insert(0) += 1;
        }
        if let Some(kind) = sample.error {
            *self.errors.entry(kind).or_insert(0) += 1;
        }

        self.update_timeline(sample.timestamp_us, failed);
    }

    pub fn record_check(&mut self, outcome: &CheckOutcome) {
        let entry = self.checks.entry(outcome.name.to_string()).or_default();
        if outcome.passed {
            entry.passes += 1;
        } else {
            entry.fails += 1;
        }
    }

    pub fn record_iteration(&mut self, iteration: &IterationSample) {
        self.iterations += 1;
        let duration = micros(iteration.duration);
        let _ = self.iteration_duration.record(duration);
        self.iteration_latencies.push(duration);
    }

    // Samples arrive out of order, so buckets are indexed by offset from the run origin.
    fn update_timeline(&mut self, timestamp_us: u64, failed: bool) {
        let second = (timestamp_us.saturating_sub(self.origin_us) / 1_000_000) as usize;
        if self.timeline.len() <= second {
            let start = self.timeline.len();
            self.timeline.extend((start..=second).map(|s| TimelineBucket {
                elapsed_secs: s as u32,
                requests: 0,
                errors: 0,
            }));
        }
        let bucket = &mut self.timeline[second];
        bucket.requests += 1;
        if failed {
            bucket.errors += 1;
        }
    }

    /// `None` until at least one request has been recorded.
    pub fn error_rate(&self) -> Option<f64> {
        if self.total_requests > 0 {
            Some(self.failed as f64 / self.total_requests as f64)
        } else {
            None
        }
    }

    pub fn checks_passed(&self) -> u64 {
        self.checks.values().map(|c| c.passes).sum()
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks.values().map(|c| c.fails).sum()
    }

    /// `None` when no check ran.
    pub fn check_pass_rate(&self) -> Option<f64> {
        let total = self.checks_passed() + self.checks_failed();
        if total > 0 {
            Some(self.checks_passed() as f64 / total as f64)
        } else {
            None
        }
    }

    pub fn req_duration(&self) -> Trend<'_> {
        Trend(&self.req_duration)
    }

    pub fn iteration_duration(&self) -> Trend<'_> {
        Trend(&self.iteration_duration)
    }

    pub fn exact_req_duration(&self) -> ExactTrend<'_> {
        ExactTrend::new(&self.req_latencies)
    }

    pub fn exact_iteration_duration(&self) -> ExactTrend<'_> {
        ExactTrend::new(&self.iteration_latencies)
    }

    /// Sort the raw values once so snapshots answer percentile queries without copying.
    pub fn sort_latencies(&mut self) {
        self.req_latencies.sort_unstable();
        self.iteration_latencies.sort_unstable();
    }
}

/// Read-only view over a latency histogram, values in milliseconds.
pub struct Trend<'a>(&'a Histogram<u64>);

impl Trend<'_> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self) -> u64 {
        self.0.len()
    }

    pub fn min_ms(&self) -> f64 {
        self.0.min() as f64 / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.0.max() as f64 / 1000.0
    }

    pub fn avg_ms(&self) -> f64 {
        self.0.mean() / 1000.0
    }

    pub fn stddev_ms(&self) -> f64 {
        self.0.stdev() / 1000.0
    }

    pub fn percentile_ms(&self, p: f64) -> f64 {
        self.0.value_at_percentile(p) as f64 / 1000.0
    }
}

/// Aggregations over every recorded value, in milliseconds. Percentiles
/// interpolate linearly between the closest ranks, as k6 does.
pub struct ExactTrend<'a>(Cow<'a, [u64]>);

impl<'a> ExactTrend<'a> {
    fn new(values: &'a [u64]) -> Self {
        if values.is_sorted() {
            Self(Cow::Borrowed(values))
        } else {
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            Self(Cow::Owned(sorted))
        }
    }

    pub fn min_ms(&self) -> Option<f64> {
        self.0.first().map(|&v| v as f64 / 1000.0)
    }

    pub fn max_ms(&self) -> Option<f64> {
        self.0.last().map(|&v| v as f64 / 1000.0)
    }

    pub fn avg_ms(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let sum: u128 = self.0.iter().map(|&v| u128::from(v)).sum();
        Some(sum as f64 / self.0.len() as f64 / 1000.0)
    }

    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        let last = self.0.len().checked_sub(1)?;
        let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let low = self.0[lower] as f64;
        let high = self.0[upper] as f64;
        Some((low + (high - low) * (rank - lower as f64)) / 1000.0)
    }
}
