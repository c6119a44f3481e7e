use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;

// ============================================================================
// Scenarios & Stages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    ConstantVus,
    RampingVus,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::ConstantVus => "constant-vus",
            ExecutorKind::RampingVus => "ramping-vus",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u32,
}

/// Delay between iterations of a single VU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    #[default]
    None,
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl Pacing {
    pub fn next_delay<R: rand::Rng>(&self, rng: &mut R) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::Fixed(d) => d,
            Pacing::Uniform { min, max } => {
                if max <= min {
                    min
                } else {
                    let micros = rng.random_range(min.as_micros() as u64..=max.as_micros() as u64);
                    Duration::from_micros(micros)
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Pacing::None => "none".to_string(),
            Pacing::Fixed(d) => humantime::format_duration(*d).to_string(),
            Pacing::Uniform { min, max } => format!(
                "{}..{}",
                humantime::format_duration(*min),
                humantime::format_duration(*max)
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub name: String,
    pub method: reqwest::Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub weight: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub executor: ExecutorKind,
    pub start_vus: u32,
    pub stages: Vec<Stage>,
    pub start_time: Duration,
    pub graceful_ramp_down: Duration,
    pub max_vus: Option<u32>,
    pub pacing: Pacing,
    pub requests: Vec<RequestSpec>,
    pub checks: Vec<Check>,
    pub tags: Tags,
}

impl ScenarioConfig {
    /// Length of the scheduled stages, excluding `start_time` and the ramp-down window.
    pub fn stages_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest VU count any stage asks for.
    pub fn peak_vus(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// Number of VUs the pool may hold at once.
    pub fn vu_capacity(&self) -> u32 {
        match self.max_vus {
            Some(cap) => cap,
            None => self.peak_vus(),
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub condition: CheckCondition,
}

#[derive(Debug, Clone)]
pub enum CheckCondition {
    StatusEquals(u16),
    StatusIn(Vec<u16>),
    StatusLt(u16),
    StatusGt(u16),
    BodyContains(String),
    BodyNotContains(String),
    BodyMatches(regex_lite::Regex),
}

impl CheckCondition {
    pub fn evaluate(&self, status: Option<u16>, body: &str) -> bool {
        match self {
            CheckCondition::StatusEquals(expected) => status == Some(*expected),
            CheckCondition::StatusIn(codes) => status.map(|s| codes.contains(&s)).unwrap_or(false),
            CheckCondition::StatusLt(threshold) => status.map(|s| s < *threshold).unwrap_or(false),
            CheckCondition::StatusGt(threshold) => status.map(|s| s > *threshold).unwrap_or(false),
            CheckCondition::BodyContains(needle) => body.contains(needle),
            CheckCondition::BodyNotContains(needle) => !body.contains(needle),
            CheckCondition::BodyMatches(re) => re.is_match(body),
        }
    }

    pub fn needs_body(&self) -> bool {
        matches!(
            self,
            CheckCondition::BodyContains(_)
                | CheckCondition::BodyNotContains(_)
                | CheckCondition::BodyMatches(_)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    pub passes: u64,
    pub fails: u64,
}

impl CheckStats {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() > 0 {
            self.passes as f64 / self.total() as f64
        } else {
            1.0
        }
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// A metric name with an optional tag filter, e.g. `http_req_duration{scenario:load}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricSelector {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

impl MetricSelector {
    pub fn is_submetric(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        self.tags
            .iter()
            .all(|(k, v)| lookup(k).as_deref() == Some(v.as_str()))
    }
}

impl std::fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Value,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

impl ThresholdOp {
    pub fn evaluate(&self, actual: f64, expected: f64) -> bool {
        match self {
            ThresholdOp::Lt => actual < expected,
            ThresholdOp::Lte => actual <= expected,
            ThresholdOp::Gt => actual > expected,
            ThresholdOp::Gte => actual >= expected,
            ThresholdOp::Eq => (actual - expected).abs() < f64::EPSILON,
            ThresholdOp::Ne => (actual - expected).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub operator: ThresholdOp,
    pub value: f64,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: MetricSelector,
    pub expr: ThresholdExpr,
    pub informational: bool,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub condition: String,
    pub actual: Option<f64>,
    pub passed: bool,
    pub informational: bool,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Dns,
    Connect,
    Tls,
    Refused,
    Reset,
    Http,
    Body,
    Other,
}

impl ErrorKind {
    pub fn from_reqwest_error(err: &reqwest::Error) -> Self {
        let text = err.to_string().to_lowercase();
        if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            if text.contains("dns") || text.contains("resolve") {
                ErrorKind::Dns
            } else if text.contains("refused") {
                ErrorKind::Refused
            } else if text.contains("reset") {
                ErrorKind::Reset
            } else {
                ErrorKind::Connect
            }
        } else if err.is_builder() || err.is_request() {
            ErrorKind::Http
        } else if err.is_body() || err.is_decode() {
            ErrorKind::Body
        } else if text.contains("tls") || text.contains("certificate") {
            ErrorKind::Tls
        } else {
            ErrorKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Dns => "dns",
            ErrorKind::Connect => "connect",
            ErrorKind::Tls => "tls",
            ErrorKind::Refused => "refused",
            ErrorKind::Reset => "reset",
            ErrorKind::Http => "http",
            ErrorKind::Body => "body",
            ErrorKind::Other => "other",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "try increasing --timeout",
            ErrorKind::Dns => "check the hostname",
            ErrorKind::Connect => "check network and firewall",
            ErrorKind::Tls => "try --insecure to skip verification",
            ErrorKind::Refused => "is the server running?",
            ErrorKind::Reset => "server closed the connection",
            ErrorKind::Http => "check request URL and parameters",
            ErrorKind::Body => "response body error",
            ErrorKind::Other => "",
        }
    }
}

// ============================================================================
// Observations
// ============================================================================

/// One completed request. Never mutated after the VU builds it.
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp_us: u64,
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<ErrorKind>,
    pub bytes_received: u64,
    pub tags: Arc<Tags>,
}

impl Sample {
    /// Transport errors and statuses outside 200..=399 count as failed requests.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || !matches!(self.status, Some(200..=399))
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        match key {
            "status" => self.status.map(|s| s.to_string()),
            "error" => self.error.map(|e| e.as_str().to_string()),
            _ => self.tags.get(key).cloned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: Arc<str>,
    pub passed: bool,
    pub tags: Arc<Tags>,
}

#[derive(Debug, Clone)]
pub struct IterationSample {
    pub duration: Duration,
    pub tags: Arc<Tags>,
}

/// Everything a VU reports, routed through one channel to the collector.
#[derive(Debug, Clone)]
pub enum Observation {
    Request(Sample),
    Check(CheckOutcome),
    Iteration(IterationSample),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub elapsed_secs: u32,
    pub requests: u64,
    pub errors: u64,
}

// ============================================================================
// Run configuration & state
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub insecure: bool,
    pub http2: bool,
    pub follow_redirects: bool,
    pub disable_keepalive: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            insecure: false,
            http2: false,
            follow_redirects: true,
            disable_keepalive: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub scenarios: Vec<ScenarioConfig>,
    pub thresholds: Vec<Threshold>,
    pub http: HttpSettings,
    pub fail_fast: bool,
}

impl RunConfig {
    /// Wall-clock length of the scheduled part of the run.
    pub fn scheduled_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(|s| s.start_time + s.stages_duration())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn peak_vus(&self) -> u32 {
        self.scenarios.iter().map(|s| s.peak_vus()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Setup,
    Ramp,
    Teardown,
    Done,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Setup => "setup",
            RunPhase::Ramp => "running",
            RunPhase::Teardown => "teardown",
            RunPhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub phase: RunPhase,
    pub elapsed: Duration,
    pub target_vus: u32,
    pub active_vus: u32,
    pub max_vus: u32,
    pub requests: u64,
    pub failed: u64,
    pub iterations: u64,
}
