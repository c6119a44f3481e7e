//! Configuration parsing tests
//!
//! These tests verify TOML scenario files are parsed and validated correctly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::{TempDir, tempdir};

fn loadstage() -> Command {
    Command::cargo_bin("loadstage").unwrap()
}

fn write_config(content: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("loadstage.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

mod basic_config {
    use super::*;

    #[test]
    fn minimal_config_validates() {
        let (_dir, config) = write_config(
            r#"
[scenarios.smoke]
vus = 10
duration = "30s"

[[scenarios.smoke.requests]]
url = "https://example.com/health"
"#,
        );

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Configuration validated"))
            .stderr(predicate::str::contains("smoke (constant-vus"))
            .stderr(predicate::str::contains("30s -> 10 VUs"))
            .stderr(predicate::str::contains("GET https://example.com/health"));
    }

    #[test]
    fn ramping_stages_are_listed() {
        let (_dir, config) = write_config(
            r#"
[defaults]
base_url = "http://localhost:8000"

[scenarios.load]
stages = [
  { duration = "20s", target = 10 },
  { duration = "40s", target = 30 },
  { duration = "20s", target = 0 },
]
graceful_ramp_down = "5s"
pacing = "100ms"

[[scenarios.load.requests]]
name = "search"
url = "/api/v1/events/search"
query = { query = "protest", limit = 20 }
"#,
        );

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("load (ramping-vus"))
            .stderr(predicate::str::contains("1. 20s -> 10 VUs"))
            .stderr(predicate::str::contains("2. 40s -> 30 VUs"))
            .stderr(predicate::str::contains("3. 20s -> 0 VUs"))
            .stderr(predicate::str::contains("Peak VUs:    30"))
            .stderr(predicate::str::contains("http://localhost:8000/api/v1/events/search"));
    }

    #[test]
    fn weighted_requests_are_listed() {
        let (_dir, config) = write_config(
            r#"
[defaults]
base_url = "http://localhost:8000"

[scenarios.mixed]
vus = 5
duration = "10s"

[[scenarios.mixed.requests]]
url = "/read"
weight = 3

[[scenarios.mixed.requests]]
method = "POST"
url = "/write"
body = '{"x":1}'
"#,
        );

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("GET http://localhost:8000/read (weight 3)"))
            .stderr(predicate::str::contains("POST http://localhost:8000/write (weight 1)"));
    }

    #[test]
    fn invalid_toml_fails() {
        let (_dir, config) = write_config("[scenarios.smoke\nvus = ");

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("failed to parse config file"));
    }

    #[test]
    fn missing_file_fails() {
        loadstage()
            .args(["run", "-f", "/nonexistent/loadstage.toml", "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("failed to read config file"));
    }

    #[test]
    fn empty_config_has_no_scenarios() {
        let (_dir, config) = write_config("[defaults]\ntimeout = \"5s\"\n");

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no scenarios defined"));
    }
}

mod env_vars {
    use super::*;

    const CONFIG: &str = r#"
[defaults]
base_url = "${LOADSTAGE_IT_BASE_URL:-http://localhost:8000}"

[scenarios.smoke]
vus = 1
duration = "5s"

[[scenarios.smoke.requests]]
url = "/health"

[[scenarios.smoke.requests]]
url = "/users/${LOADSTAGE_IT_USER_ID}"
"#;

    #[test]
    fn env_override_fills_variables() {
        let (_dir, config) = write_config(CONFIG);

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "-e",
                "LOADSTAGE_IT_BASE_URL=https://staging.example.com",
                "-e",
                "LOADSTAGE_IT_USER_ID=42",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("https://staging.example.com/health"))
            .stderr(predicate::str::contains("https://staging.example.com/users/42"));
    }

    #[test]
    fn default_value_used_when_unset() {
        let (_dir, config) = write_config(CONFIG);

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "-e",
                "LOADSTAGE_IT_USER_ID=7",
                "--dry-run",
            ])
            .env_remove("LOADSTAGE_IT_BASE_URL")
            .assert()
            .success()
            .stderr(predicate::str::contains("http://localhost:8000/users/7"));
    }

    #[test]
    fn process_environment_is_read() {
        let (_dir, config) = write_config(CONFIG);

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .env("LOADSTAGE_IT_USER_ID", "99")
            .assert()
            .success()
            .stderr(predicate::str::contains("/users/99"));
    }

    #[test]
    fn missing_variable_without_default_fails() {
        let (_dir, config) = write_config(CONFIG);

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .env_remove("LOADSTAGE_IT_USER_ID")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("LOADSTAGE_IT_USER_ID"))
            .stderr(predicate::str::contains("not set"));
    }
}

mod scenarios {
    use super::*;

    const TWO_SCENARIOS: &str = r#"
[defaults]
base_url = "http://localhost:8000"

[scenarios.smoke]
vus = 2
duration = "10s"

[[scenarios.smoke.requests]]
url = "/health"

[scenarios.load]
start_time = "10s"
stages = [{ duration = "30s", target = 20 }]

[[scenarios.load.requests]]
url = "/search"
"#;

    #[test]
    fn all_scenarios_run_by_default() {
        let (_dir, config) = write_config(TWO_SCENARIOS);

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Scenarios:   2 defined"))
            .stderr(predicate::str::contains("Duration:    40s"));
    }

    #[test]
    fn scenario_filter_selects_one() {
        let (_dir, config) = write_config(TWO_SCENARIOS);

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "--scenario",
                "smoke",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("Scenarios:   1 defined"))
            .stderr(predicate::str::contains("smoke (constant-vus"))
            .stderr(predicate::str::contains("load (").not());
    }

    #[test]
    fn unknown_scenario_fails() {
        let (_dir, config) = write_config(TWO_SCENARIOS);

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "--scenario",
                "soak",
                "--dry-run",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("unknown scenario 'soak'"))
            .stderr(predicate::str::contains("load, smoke"));
    }

    #[test]
    fn constant_vus_with_stages_fails() {
        let (_dir, config) = write_config(
            r#"
[scenarios.broken]
executor = "constant-vus"
vus = 5
duration = "10s"
stages = [{ duration = "10s", target = 5 }]

[[scenarios.broken.requests]]
url = "http://localhost:8000/"
"#,
        );

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("scenario 'broken'"))
            .stderr(predicate::str::contains("not 'stages'"));
    }

    #[test]
    fn scenario_without_requests_fails() {
        let (_dir, config) = write_config(
            r#"
[scenarios.idle]
vus = 1
duration = "10s"
"#,
        );

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("at least one request is required"));
    }

    #[test]
    fn pacing_and_max_vus_flags_override_file() {
        let (_dir, config) = write_config(TWO_SCENARIOS);

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "--pacing",
                "100ms..300ms",
                "--max-vus",
                "8",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("max VUs: 8"));
    }
}

mod thresholds {
    use super::*;

    const SCENARIO: &str = r#"
[scenarios.load]
stages = [{ duration = "10s", target = 5 }]

[[scenarios.load.requests]]
url = "http://localhost:8000/"
"#;

    #[test]
    fn threshold_table_is_parsed() {
        let (_dir, config) = write_config(&format!(
            r#"{SCENARIO}
[thresholds]
http_req_failed = ["rate<0.02"]
"http_req_duration{{scenario:load}}" = [
  "p(95)<1500",
  {{ threshold = "p(99)<3s", abort_on_fail = true, delay_abort_eval = "10s" }},
]
checks = [{{ threshold = "rate>0.99", informational = true }}]
"#
        ));

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Thresholds:  4 defined"))
            .stderr(predicate::str::contains("http_req_failed: rate<0.02"))
            .stderr(predicate::str::contains(
                "http_req_duration{scenario:load}: p(99)<3s (abort on fail)",
            ))
            .stderr(predicate::str::contains("checks: rate>0.99 (informational)"));
    }

    #[test]
    fn unknown_metric_in_file_fails() {
        let (_dir, config) = write_config(&format!(
            "{SCENARIO}\n[thresholds]\nhttp_req_latency = [\"p(95)<800\"]\n"
        ));

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("unknown threshold metric 'http_req_latency'"));
    }

    #[test]
    fn unsupported_aggregation_fails() {
        let (_dir, config) = write_config(&format!(
            "{SCENARIO}\n[thresholds]\nhttp_req_failed = [\"p(95)<0.1\"]\n"
        ));

        loadstage()
            .args(["run", "-f", config.to_str().unwrap(), "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid threshold"));
    }

    #[test]
    fn cli_thresholds_add_to_file_thresholds() {
        let (_dir, config) = write_config(&format!(
            "{SCENARIO}\n[thresholds]\nhttp_req_failed = [\"rate<0.02\"]\n"
        ));

        loadstage()
            .args([
                "run",
                "-f",
                config.to_str().unwrap(),
                "-t",
                "http_req_duration=p(95)<=800",
                "--fail-fast",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("Thresholds:  2 defined"))
            .stderr(predicate::str::contains("http_req_duration: p(95)<=800 (abort on fail)"));
    }
}

mod bundled_scenarios {
    use super::*;

    fn scenario_file(name: &str) -> String {
        format!("{}/scenarios/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn smoke_scenario_validates() {
        loadstage()
            .args(["run", "-f", &scenario_file("smoke.toml"), "--dry-run"])
            .env_remove("BASE_URL")
            .assert()
            .success()
            .stderr(predicate::str::contains("30s -> 10 VUs"))
            .stderr(predicate::str::contains("pacing 200ms"))
            .stderr(predicate::str::contains("http://localhost:8000/health"));
    }

    #[test]
    fn load_scenario_validates() {
        loadstage()
            .args(["run", "-f", &scenario_file("load.toml"), "--dry-run"])
            .env_remove("BASE_URL")
            .assert()
            .success()
            .stderr(predicate::str::contains("graceful ramp-down 5s"))
            .stderr(predicate::str::contains("Duration:    80s"))
            .stderr(predicate::str::contains("Peak VUs:    30"))
            .stderr(predicate::str::contains("Thresholds:  3 defined"));
    }
}
