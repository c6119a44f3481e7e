use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Parser, Debug)]
#[command(
    name = "loadstage",
    author,
    version,
    about = "Staged virtual-user HTTP load testing with k6-style thresholds",
    long_about = "loadstage ramps virtual users through timed stages against an HTTP target,\n\
                  aggregates latency and error metrics, and exits non-zero when\n\
                  thresholds such as 'http_req_failed: rate<0.02' are not met."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a load test from a config file or against a single URL
    #[command(name = "run")]
    Run(Box<RunArgs>),

    /// Generate a starter config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Generate man page
    Man,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Target URL for an ad-hoc single-scenario run
    #[arg(required_unless_present = "config")]
    pub url: Option<String>,

    /// Config file path (TOML)
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Only run the named scenario (can be specified multiple times)
    #[arg(short = 's', long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Constant number of virtual users (ad-hoc runs)
    #[arg(long, default_value = "1", conflicts_with = "stages")]
    pub vus: u32,

    /// Test duration for constant VUs (e.g., 30s, 1m)
    #[arg(short = 'd', long, default_value = "30s", value_parser = parse_duration, conflicts_with = "stages")]
    pub duration: Duration,

    /// Ramping stage as DURATION:TARGET, e.g. 20s:10 (can be specified multiple times)
    #[arg(long = "stage", value_name = "DURATION:TARGET")]
    pub stages: Vec<String>,

    /// Time a stopped VU gets to finish its iteration (ad-hoc runs)
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub graceful_ramp_down: Duration,

    /// Delay between iterations: 100ms, or a uniform range like 100ms..500ms
    #[arg(long, value_name = "PACING")]
    pub pacing: Option<String>,

    /// Cap on concurrently running VUs per scenario
    #[arg(long)]
    pub max_vus: Option<u32>,

    /// HTTP method (ad-hoc runs)
    #[arg(short = 'm', long, default_value = "GET")]
    pub method: String,

    /// HTTP headers (can be specified multiple times)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Request body (ad-hoc runs)
    #[arg(short = 'b', long)]
    pub body: Option<String>,

    /// Threshold as METRIC=EXPR, e.g. 'http_req_duration=p(95)<800' (can be specified multiple times)
    #[arg(short = 't', long = "threshold", value_name = "METRIC=EXPR")]
    pub thresholds: Vec<String>,

    /// Response check, e.g. 'status == 200' (ad-hoc runs, can be specified multiple times)
    #[arg(long = "check", value_name = "CONDITION")]
    pub checks: Vec<String>,

    /// Request timeout (e.g., 60s)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Connection timeout (e.g., 10s)
    #[arg(long, value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Use HTTP/2 (default: HTTP/1.1)
    #[arg(long)]
    pub http2: bool,

    /// Disable following HTTP redirects
    #[arg(long)]
    pub no_follow_redirects: bool,

    /// Disable HTTP keepalive (new connection per request)
    #[arg(long)]
    pub disable_keepalive: bool,

    /// Set a config variable as KEY=VALUE, taking precedence over the environment
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Write the JSON report to this file
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print the JSON report to stdout instead of the summary
    #[arg(long)]
    pub json: bool,

    /// Suppress progress and summary output (for CI)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Validate config and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Abort as soon as any threshold fails
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output file path (default: loadstage.toml)
    #[arg(short, long, default_value = "loadstage.toml")]
    pub output: PathBuf,

    /// Base URL to include in config
    #[arg(short, long)]
    pub url: Option<String>,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "loadstage", &mut std::io::stdout());
}

pub fn generate_man_page() -> Result<(), std::io::Error> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    man.render(&mut std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeatable_run_flags() {
        let cli = Cli::try_parse_from([
            "loadstage",
            "-vv",
            "run",
            "http://localhost:8000/health",
            "--stage",
            "10s:5",
            "--stage",
            "20s:0",
            "-t",
            "http_req_failed=rate<0.01",
            "--check",
            "status == 200",
            "-e",
            "BASE_URL=http://x",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.stages, vec!["10s:5", "20s:0"]);
        assert_eq!(args.thresholds.len(), 1);
        assert_eq!(args.checks, vec!["status == 200"]);
        assert_eq!(args.env, vec!["BASE_URL=http://x"]);
    }

    #[test]
    fn run_requires_url_or_config() {
        assert!(Cli::try_parse_from(["loadstage", "run"]).is_err());
        assert!(Cli::try_parse_from(["loadstage", "run", "-f", "load.toml"]).is_ok());
    }

    #[test]
    fn stages_conflict_with_constant_vus() {
        let result = Cli::try_parse_from([
            "loadstage",
            "run",
            "http://localhost",
            "--vus",
            "5",
            "--stage",
            "10s:5",
        ]);
        assert!(result.is_err());
    }
}
