use crate::engine::{RunOutcome, ThresholdReport, Trend};
use crate::types::{RunConfig, ThresholdResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Serialize)]
pub struct JsonOutput {
    pub metadata: Metadata,
    pub summary: Summary,
    pub http_req_duration_ms: TrendOutput,
    pub iteration_duration_ms: TrendOutput,
    pub checks: Vec<CheckEntry>,
    pub status_codes: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub timeline: Vec<TimelineEntry>,
    pub thresholds: ThresholdReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<ThresholdResult>,
}

#[derive(Serialize)]
pub struct Metadata {
    pub tool: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub cancelled: bool,
    pub scenarios: Vec<ScenarioEntry>,
    pub http: HttpEntry,
    pub env: Environment,
}

#[derive(Serialize)]
pub struct ScenarioEntry {
    pub name: String,
    pub executor: String,
    pub start_vus: u32,
    pub stages: Vec<StageEntry>,
    pub start_time_ms: u64,
    pub graceful_ramp_down_ms: u64,
    pub pacing: String,
    pub requests: Vec<RequestEntry>,
    pub peak_running_vus: u32,
    pub max_shortfall: u32,
    pub interrupted_iterations: u64,
}

#[derive(Serialize)]
pub struct StageEntry {
    pub duration_ms: u64,
    pub target: u32,
}

#[derive(Serialize)]
pub struct RequestEntry {
    pub name: String,
    pub method: String,
    pub url: String,
    pub weight: u32,
    pub headers: Vec<String>,
}

#[derive(Serialize)]
pub struct HttpEntry {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub http2: bool,
    pub insecure: bool,
}

#[derive(Serialize)]
pub struct Environment {
    pub hostname: String,
    pub os: String,
    pub cpus: usize,
}

#[derive(Serialize)]
pub struct Summary {
    pub http_reqs: u64,
    pub successful: u64,
    pub failed: u64,
    pub http_req_failed: f64,
    pub requests_per_sec: f64,
    pub iterations: u64,
    pub iterations_per_sec: f64,
    pub interrupted_iterations: u64,
    pub data_received: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub vus_max: u32,
}

#[derive(Serialize, Default)]
pub struct TrendOutput {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub stddev: f64,
}

impl TrendOutput {
    fn from_trend(trend: Trend<'_>) -> Self {
        if trend.is_empty() {
            return Self::default();
        }
        Self {
            count: trend.count(),
            avg: trend.avg_ms(),
            min: trend.min_ms(),
            med: trend.percentile_ms(50.0),
            max: trend.max_ms(),
            p90: trend.percentile_ms(90.0),
            p95: trend.percentile_ms(95.0),
            p99: trend.percentile_ms(99.0),
            stddev: trend.stddev_ms(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
    pub pass_rate: f64,
}

#[derive(Serialize)]
pub struct TimelineEntry {
    pub elapsed_secs: u32,
    pub requests: u64,
    pub errors: u64,
}

fn redact_header(name: &str, value: &str) -> String {
    let lower = name.to_lowercase();
    if lower == "authorization"
        || lower == "cookie"
        || lower == "x-api-key"
        || lower.contains("token")
        || lower.contains("secret")
        || lower.contains("password")
    {
        return format!("{}: <redacted>", name);
    }
    format!("{}: {}", name, value)
}

pub fn create_output(outcome: &RunOutcome, config: &RunConfig) -> JsonOutput {
    let metrics = &outcome.metrics;
    let totals = &metrics.totals;
    let now = Utc::now();
    let started_at = now - chrono::Duration::from_std(metrics.elapsed).unwrap_or_default();

    let scenarios = config
        .scenarios
        .iter()
        .map(|s| {
            let ran = outcome.scenarios.iter().find(|o| o.name == s.name);
            ScenarioEntry {
                name: s.name.clone(),
                executor: s.executor.as_str().to_string(),
                start_vus: s.start_vus,
                stages: s
                    .stages
                    .iter()
                    .map(|st| StageEntry {
                        duration_ms: st.duration.as_millis() as u64,
                        target: st.target,
                    })
                    .collect(),
                start_time_ms: s.start_time.as_millis() as u64,
                graceful_ramp_down_ms: s.graceful_ramp_down.as_millis() as u64,
                pacing: s.pacing.describe(),
                requests: s
                    .requests
                    .iter()
                    .map(|r| RequestEntry {
                        name: r.name.clone(),
                        method: r.method.to_string(),
                        url: r.url.clone(),
                        weight: r.weight,
                        headers: r.headers.iter().map(|(k, v)| redact_header(k, v)).collect(),
                    })
                    .collect(),
                peak_running_vus: ran.map(|o| o.peak_running).unwrap_or(0),
                max_shortfall: ran.map(|o| o.max_shortfall).unwrap_or(0),
                interrupted_iterations: ran.map(|o| o.interrupted).unwrap_or(0),
            }
        })
        .collect();

    JsonOutput {
        metadata: Metadata {
            tool: "loadstage".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            ended_at: now,
            duration_secs: metrics.elapsed.as_secs_f64(),
            cancelled: outcome.cancelled,
            scenarios,
            http: HttpEntry {
                timeout_ms: config.http.timeout.as_millis() as u64,
                connect_timeout_ms: config.http.connect_timeout.as_millis() as u64,
                http2: config.http.http2,
                insecure: config.http.insecure,
            },
            env: Environment {
                hostname: hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "unknown".to_string()),
                os: std::env::consts::OS.to_string(),
                cpus: num_cpus(),
            },
        },
        summary: Summary {
            http_reqs: totals.total_requests,
            successful: totals.successful,
            failed: totals.failed,
            http_req_failed: totals.error_rate().unwrap_or(0.0),
            requests_per_sec: metrics.requests_per_sec(),
            iterations: totals.iterations,
            iterations_per_sec: metrics.iterations_per_sec(),
            interrupted_iterations: metrics.interrupted_iterations,
            data_received: totals.bytes_received,
            checks_passed: totals.checks_passed(),
            checks_failed: totals.checks_failed(),
            vus_max: metrics.vus_max,
        },
        http_req_duration_ms: TrendOutput::from_trend(totals.req_duration()),
        iteration_duration_ms: TrendOutput::from_trend(totals.iteration_duration()),
        checks: totals
            .checks
            .iter()
            .map(|(name, stats)| CheckEntry {
                name: name.clone(),
                passes: stats.passes,
                fails: stats.fails,
                pass_rate: stats.pass_rate(),
            })
            .collect(),
        status_codes: totals
            .status_codes
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
        errors: totals
            .errors
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect(),
        timeline: totals
            .timeline
            .iter()
            .map(|b| TimelineEntry {
                elapsed_secs: b.elapsed_secs,
                requests: b.requests,
                errors: b.errors,
            })
            .collect(),
        thresholds: outcome.thresholds.clone(),
        aborted_by: outcome.aborted_by.clone(),
    }
}

pub fn write_json(outcome: &RunOutcome, config: &RunConfig, path: &Path) -> io::Result<()> {
    let output = create_output(outcome, config);
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &output)?;
    writer.flush()
}

pub fn print_json(outcome: &RunOutcome, config: &RunConfig) -> io::Result<()> {
    let output = create_output(outcome, config);
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    serde_json::to_writer_pretty(&mut writer, &output)?;
    writeln!(writer)?;
    writer.flush()
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}
