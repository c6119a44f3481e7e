use crate::engine::{AggregateMetrics, Stats};
use crate::http::now_us;
use crate::types::{CheckOutcome, IterationSample, MetricSelector, Observation, Sample};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

struct Accumulator {
    totals: Stats,
    submetrics: Vec<(MetricSelector, Stats)>,
    vus: u32,
    vus_max: u32,
    interrupted_iterations: u64,
}

/// The run's single shared metrics accumulator.
///
/// Every mutation goes through one mutex. Sub-metrics are declared up front
/// (from tag-filtered thresholds) and fed only the observations whose tags match.
pub struct MetricsCollector {
    inner: Mutex<Accumulator>,
    started: Instant,
}

impl MetricsCollector {
    pub fn new(submetrics: impl IntoIterator<Item = MetricSelector>) -> Self {
        let origin_us = now_us();
        let mut declared: Vec<(MetricSelector, Stats)> = Vec::new();
        for selector in submetrics {
            if selector.is_submetric() && !declared.iter().any(|(s, _)| *s == selector) {
                declared.push((selector, Stats::new(origin_us)));
            }
        }

        Self {
            inner: Mutex::new(Accumulator {
                totals: Stats::new(origin_us),
                submetrics: declared,
                vus: 0,
                vus_max: 0,
                interrupted_iterations: 0,
            }),
            started: Instant::now(),
        }
    }

    // A panicking VU must not take the metrics down with it
    fn lock(&self) -> MutexGuard<'_, Accumulator> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, sample: Sample) {
        let mut acc = self.lock();
        acc.totals.record(&sample);
        for (selector, stats) in acc.submetrics.iter_mut() {
            if selector.matches(|k| sample.tag(k)) {
                stats.record(&sample);
            }
        }
    }

    pub fn record_check(&self, outcome: CheckOutcome) {
        let mut acc = self.lock();
        acc.totals.record_check(&outcome);
        for (selector, stats) in acc.submetrics.iter_mut() {
            if selector.matches(|k| tag_lookup(&outcome.tags, k, Some(&outcome.name))) {
                stats.record_check(&outcome);
            }
        }
    }

    pub fn record_iteration(&self, iteration: IterationSample) {
        let mut acc = self.lock();
        acc.totals.record_iteration(&iteration);
        for (selector, stats) in acc.submetrics.iter_mut() {
            if selector.matches(|k| tag_lookup(&iteration.tags, k, None)) {
                stats.record_iteration(&iteration);
            }
        }
    }

    pub fn record_observation(&self, observation: Observation) {
        match observation {
            Observation::Request(sample) => self.record(sample),
            Observation::Check(outcome) => self.record_check(outcome),
            Observation::Iteration(iteration) => self.record_iteration(iteration),
        }
    }

    pub fn set_vus(&self, active: u32) {
        let mut acc = self.lock();
        acc.vus = active;
        acc.vus_max = acc.vus_max.max(active);
    }

    pub fn add_interrupted(&self, count: u64) {
        self.lock().interrupted_iterations += count;
    }

    pub fn snapshot(&self) -> AggregateMetrics {
        let acc = self.lock();
        AggregateMetrics {
            elapsed: self.started.elapsed(),
            vus: acc.vus,
            vus_max: acc.vus_max,
            interrupted_iterations: acc.interrupted_iterations,
            totals: sorted(&acc.totals),
            submetrics: acc
                .submetrics
                .iter()
                .map(|(selector, stats)| (selector.clone(), sorted(stats)))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

fn sorted(stats: &Stats) -> Stats {
    let mut stats = stats.clone();
    stats.sort_latencies();
    stats
}

fn tag_lookup(tags: &crate::types::Tags, key: &str, check: Option<&str>) -> Option<String> {
    match (key, check) {
        ("check", Some(name)) => Some(name.to_string()),
        _ => tags.get(key).cloned(),
    }
}
