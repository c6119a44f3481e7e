use std::path::PathBuf;
use thiserror::Error;

/// Problems found while loading or validating a run configuration.
/// All of them are fatal before any VU starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable '{0}' not set")]
    MissingEnvVar(String),

    #[error("invalid --env entry '{0}', expected KEY=VALUE")]
    InvalidEnvEntry(String),

    #[error("no scenarios defined; provide a URL or a config file with [scenarios]")]
    NoScenarios,

    #[error("unknown scenario '{name}' (available: {available})")]
    UnknownScenario { name: String, available: String },

    #[error("scenario '{scenario}': {reason}")]
    InvalidScenario { scenario: String, reason: String },

    #[error("invalid stage '{0}', expected DURATION:TARGET (e.g. 30s:10)")]
    InvalidStage(String),

    #[error("scenario '{scenario}': invalid URL '{url}'")]
    InvalidUrl { scenario: String, url: String },

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid check '{condition}': {reason}")]
    InvalidCheck { condition: String, reason: String },

    #[error("unknown threshold metric '{metric}'. Valid metrics: {valid}")]
    UnknownMetric { metric: String, valid: String },

    #[error("invalid threshold '{expr}' on '{metric}': {reason}")]
    InvalidThreshold {
        metric: String,
        expr: String,
        reason: String,
    },

    #[error("invalid header '{0}', expected 'Name: Value'")]
    InvalidHeader(String),
}

/// VU start failures. Logged by the scheduler, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VuError {
    #[error("VU capacity of {capacity} exhausted")]
    CapacityExhausted { capacity: u32 },
}

/// Fatal run-level errors.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("metrics aggregator task failed: {0}")]
    Aggregator(#[source] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}
