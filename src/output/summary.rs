use crate::engine::{RunOutcome, Stats};
use crate::output::{Colour, paint};
use crate::types::RunConfig;

pub fn print_summary(outcome: &RunOutcome, config: &RunConfig) {
    let metrics = &outcome.metrics;
    let totals = &metrics.totals;

    println!("\n{}", "=".repeat(60));
    println!("{:^60}", "LOAD TEST RESULTS");
    println!("{}", "=".repeat(60));

    if outcome.cancelled {
        println!(
            "\n{}",
            paint(Colour::Yellow, "Run cancelled before the schedule completed.")
        );
    }
    if let Some(aborted) = &outcome.aborted_by {
        let message = format!(
            "Run aborted: threshold {} {} crossed.",
            aborted.metric, aborted.condition
        );
        println!("\n{}", paint(Colour::Red, message));
    }

    println!("\nScenarios:");
    for scenario in &config.scenarios {
        let ran = outcome.scenarios.iter().find(|o| o.name == scenario.name);
        println!(
            "  {:<16} {:<13} peak {:>4} VUs  pacing {}",
            scenario.name,
            scenario.executor.as_str(),
            ran.map(|o| o.peak_running).unwrap_or(0),
            scenario.pacing.describe()
        );
        if let Some(o) = ran.filter(|o| o.max_shortfall > 0) {
            let shortfall = format!("fell short of target by up to {} VUs", o.max_shortfall);
            println!("  {:<16} {}", "", paint(Colour::Yellow, shortfall));
        }
    }

    println!("\nThroughput:");
    println!("  Duration:        {:>11.1}s", metrics.elapsed.as_secs_f64());
    println!("  http_reqs:       {:>12}", totals.total_requests);
    println!("  Requests/sec:    {:>12.2}", metrics.requests_per_sec());
    println!("  iterations:      {:>12}", totals.iterations);
    println!("  Interrupted:     {:>12}", metrics.interrupted_iterations);
    println!("  vus_max:         {:>12}", metrics.vus_max);
    println!("  data_received:   {:>12}", format_bytes(totals.bytes_received));

    print_failures(totals);

    println!("\nhttp_req_duration (ms):");
    let trend = totals.req_duration();
    if trend.is_empty() {
        println!("  no data");
    } else {
        println!("  Min:             {:>12.2}", trend.min_ms());
        println!("  Avg:             {:>12.2}", trend.avg_ms());
        println!("  Med:             {:>12.2}", trend.percentile_ms(50.0));
        println!("  p90:             {:>12.2}", trend.percentile_ms(90.0));
        println!("  p95:             {:>12.2}", trend.percentile_ms(95.0));
        println!("  p99:             {:>12.2}", trend.percentile_ms(99.0));
        println!("  Max:             {:>12.2}", trend.max_ms());
    }

    if !totals.status_codes.is_empty() {
        println!("\nStatus Codes:");
        let mut codes: Vec<_> = totals.status_codes.iter().collect();
        codes.sort_by_key(|(code, _)| *code);
        for (code, count) in codes {
            println!("  {}:              {:>12}", code, count);
        }
    }

    if !totals.errors.is_empty() {
        println!("\nErrors:");
        let mut errors: Vec<_> = totals.errors.iter().collect();
        errors.sort_by_key(|(kind, _)| *kind);
        for (kind, count) in errors {
            let suggestion = kind.suggestion();
            if suggestion.is_empty() {
                println!("  {:15} {:>12}", format!("{}:", kind.as_str()), count);
            } else {
                println!(
                    "  {:15} {:>12}  ({})",
                    format!("{}:", kind.as_str()),
                    count,
                    suggestion
                );
            }
        }
    }

    println!("\n{}", "=".repeat(60));
}

/// Failed requests and failed checks are always shown, including zero counts.
fn print_failures(totals: &Stats) {
    println!("\nFailures:");
    let rate = totals.error_rate().unwrap_or(0.0);
    let colour = if totals.failed > 0 { Colour::Red } else { Colour::Green };
    println!(
        "  Failed requests: {}  ({:.2}%)",
        paint(colour, format!("{:>12}", totals.failed)),
        rate * 100.0
    );
    let checks_failed = totals.checks_failed();
    let colour = if checks_failed > 0 { Colour::Red } else { Colour::Green };
    println!(
        "  Failed checks:   {}  of {}",
        paint(colour, format!("{:>12}", checks_failed)),
        totals.checks_passed() + checks_failed
    );
}

pub fn print_check_results(totals: &Stats) {
    if totals.checks.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(60));
    println!("CHECKS");
    println!("{}", "=".repeat(60));

    for (name, stats) in &totals.checks {
        let rate = stats.pass_rate() * 100.0;
        let status = if stats.fails == 0 {
            paint(Colour::Green, "✓")
        } else if rate >= 90.0 {
            paint(Colour::Yellow, "⚠")
        } else {
            paint(Colour::Red, "✗")
        };
        println!(
            "  {} {} - {}/{} ({:.1}%), {} failed",
            status,
            name,
            stats.passes,
            stats.total(),
            rate,
            stats.fails
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
