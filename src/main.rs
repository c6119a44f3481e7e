mod cli;
mod config;
mod engine;
mod error;
mod http;
mod output;
mod types;

use clap::Parser;
use cli::{Cli, Commands, InitArgs, RunArgs};
use config::build_run_config;
use engine::{Engine, print_threshold_results};
use error::RunError;
use output::{print_check_results, print_json, print_summary, run_progress, write_json};
use tracing_subscriber::EnvFilter;
use types::RunConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32, RunError> {
    match cli.command {
        Commands::Run(args) => run_load_test(&args).await,
        Commands::Init(args) => run_init(&args),
        Commands::Completions(args) => {
            cli::generate_completions(args.shell);
            Ok(0)
        }
        Commands::Man => {
            cli::generate_man_page()?;
            Ok(0)
        }
    }
}

fn run_init(args: &InitArgs) -> Result<i32, RunError> {
    use std::fs;

    if args.output.exists() && !args.force {
        return Err(RunError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "file '{}' already exists. Use --force to overwrite.",
                args.output.display()
            ),
        )));
    }

    let base_url = args
        .url
        .clone()
        .unwrap_or_else(|| "${BASE_URL:-http://localhost:8000}".to_string());

    let config = format!(
        r#"# loadstage configuration
# Run with: loadstage run -f {file}
# Select one scenario with --scenario smoke, override variables with -e BASE_URL=...

[defaults]
base_url = "{base_url}"
timeout = "60s"
# connect_timeout = "10s"
# http2 = false
# insecure = false

# [defaults.headers]
# Authorization = "Bearer ${{API_TOKEN:-changeme}}"

# Constant load against the health endpoint
[scenarios.smoke]
executor = "constant-vus"
vus = 10
duration = "30s"
pacing = "200ms"

[[scenarios.smoke.requests]]
name = "health"
url = "/health"

[[scenarios.smoke.checks]]
name = "status is 200"
condition = "status == 200"

# Ramp up, hold, ramp down against the search endpoint.
# Starts after the smoke scenario; remove start_time to run both at once.
[scenarios.load]
executor = "ramping-vus"
start_time = "30s"
start_vus = 0
graceful_ramp_down = "5s"
pacing = "100ms"
# pacing = {{ min = "100ms", max = "500ms" }}
stages = [
  {{ duration = "20s", target = 10 }},
  {{ duration = "40s", target = 30 }},
  {{ duration = "20s", target = 0 }},
]
tags = {{ endpoint = "search" }}

[[scenarios.load.requests]]
name = "search"
url = "/api/v1/events/search"
query = {{ query = "protest", limit = 20 }}

[[scenarios.load.checks]]
name = "status is 200"
condition = "status == 200"

# Thresholds: <aggregation> <op> <value>, ms or s suffixes allowed.
# Tag filters define sub-metrics: "http_req_duration{{scenario:load}}".
[thresholds]
http_req_failed = ["rate<0.02"]
"http_req_duration{{scenario:smoke}}" = ["p(95)<800"]
"http_req_duration{{scenario:load}}" = [
  "p(95)<1500",
  # {{ threshold = "p(99)<3s", abort_on_fail = true, delay_abort_eval = "10s" }},
]
checks = ["rate>0.99"]
"#,
        file = args.output.display(),
        base_url = base_url
    );

    fs::write(&args.output, config)?;

    eprintln!("Created config file: {}", args.output.display());
    eprintln!("\nRun with: loadstage run -f {}", args.output.display());

    Ok(0)
}

fn print_dry_run(config: &RunConfig) {
    eprintln!("Configuration validated successfully!\n");
    eprintln!("Scenarios:   {} defined", config.scenarios.len());
    for scenario in &config.scenarios {
        eprintln!(
            "  - {} ({}, start {:?}, graceful ramp-down {:?}, pacing {})",
            scenario.name,
            scenario.executor.as_str(),
            scenario.start_time,
            scenario.graceful_ramp_down,
            scenario.pacing.describe()
        );
        if scenario.executor == types::ExecutorKind::RampingVus {
            eprintln!("      start:  {} VUs", scenario.start_vus);
        }
        for (i, stage) in scenario.stages.iter().enumerate() {
            eprintln!("      {}. {:?} -> {} VUs", i + 1, stage.duration, stage.target);
        }
        if let Some(cap) = scenario.max_vus {
            eprintln!("      max VUs: {}", cap);
        }
        for request in &scenario.requests {
            eprintln!(
                "      {} {} (weight {})",
                request.method, request.url, request.weight
            );
        }
        for check in &scenario.checks {
            eprintln!("      check: {}", check.name);
        }
    }
    eprintln!("Duration:    {:?}", config.scheduled_duration());
    eprintln!("Peak VUs:    {}", config.peak_vus());
    eprintln!("Timeout:     {:?}", config.http.timeout);
    if config.http.http2 {
        eprintln!("HTTP/2:      enabled");
    }
    if !config.thresholds.is_empty() {
        eprintln!("Thresholds:  {} defined", config.thresholds.len());
        for t in &config.thresholds {
            let mut flags = Vec::new();
            if t.abort_on_fail || config.fail_fast {
                flags.push("abort on fail");
            }
            if t.informational {
                flags.push("informational");
            }
            if flags.is_empty() {
                eprintln!("  - {}: {}", t.metric, t.expr.source);
            } else {
                eprintln!("  - {}: {} ({})", t.metric, t.expr.source, flags.join(", "));
            }
        }
    }
}

async fn run_load_test(args: &RunArgs) -> Result<i32, RunError> {
    let config = build_run_config(args)?;

    if args.dry_run {
        print_dry_run(&config);
        return Ok(0);
    }

    let engine = Engine::new(config.clone());
    let cancel_token = engine.cancel_token();

    let progress_handle = if !args.quiet && !args.json {
        Some(tokio::spawn(run_progress(
            engine.state_rx(),
            config.scheduled_duration(),
        )))
    } else {
        None
    };

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping virtual users");
            ctrl_c_token.cancel();
        }
    });

    let outcome = engine.run().await?;

    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    if args.json {
        print_json(&outcome, &config)?;
    } else if !args.quiet {
        print_summary(&outcome, &config);
        print_check_results(&outcome.metrics.totals);
        print_threshold_results(&outcome.thresholds);
    }

    if let Some(path) = &args.output {
        write_json(&outcome, &config, path)?;
        if !args.quiet {
            eprintln!("Results written to: {}", path.display());
        }
    }

    if args.quiet {
        for failed in outcome.thresholds.failed().filter(|r| !r.informational) {
            eprintln!(
                "Threshold failed: {} {} (actual: {})",
                failed.metric,
                failed.condition,
                failed
                    .actual
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "no data".to_string())
            );
        }
    }

    Ok(outcome.exit_code())
}
