//! CLI integration tests
//!
//! These tests verify the command-line interface works correctly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn loadstage() -> Command {
    Command::cargo_bin("loadstage").unwrap()
}

mod help {
    use super::*;

    #[test]
    fn help_displays_usage() {
        loadstage()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage:"))
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("init"));
    }

    #[test]
    fn version_displays_version() {
        loadstage()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("loadstage"));
    }

    #[test]
    fn run_help_shows_options() {
        loadstage()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--stage"))
            .stdout(predicate::str::contains("--threshold"))
            .stdout(predicate::str::contains("--pacing"))
            .stdout(predicate::str::contains("--dry-run"));
    }

    #[test]
    fn init_help_shows_options() {
        loadstage()
            .args(["init", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--output"))
            .stdout(predicate::str::contains("--force"));
    }
}

mod validation {
    use super::*;

    #[test]
    fn run_without_url_fails() {
        loadstage().arg("run").assert().failure();
    }

    #[test]
    fn run_with_invalid_duration_fails() {
        loadstage()
            .args(["run", "http://localhost:8000", "-d", "invalid"])
            .assert()
            .failure();
    }

    #[test]
    fn invalid_stage_fails_with_config_error() {
        loadstage()
            .args(["run", "http://localhost:8000", "--stage", "10s", "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid stage"));
    }

    #[test]
    fn unknown_threshold_metric_fails_before_running() {
        loadstage()
            .args([
                "run",
                "http://localhost:8000",
                "-d",
                "1s",
                "--threshold",
                "http_req_latency=p(95)<800",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("unknown threshold metric"))
            .stderr(predicate::str::contains("http_req_duration"));
    }

    #[test]
    fn invalid_check_fails() {
        loadstage()
            .args([
                "run",
                "http://localhost:8000",
                "--check",
                "latency < 10",
                "--dry-run",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid check"));
    }

    #[test]
    fn run_dry_run_shows_constant_vus() {
        loadstage()
            .args([
                "run",
                "http://localhost:8000/health",
                "--vus",
                "10",
                "-d",
                "30s",
                "--pacing",
                "200ms",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("Configuration validated"))
            .stderr(predicate::str::contains("constant-vus"))
            .stderr(predicate::str::contains("-> 10 VUs"));
    }

    #[test]
    fn run_dry_run_shows_stages() {
        loadstage()
            .args([
                "run",
                "http://localhost:8000/search",
                "--stage",
                "20s:10",
                "--stage",
                "40s:30",
                "--stage",
                "20s:0",
                "--threshold",
                "http_req_failed=rate<0.02",
                "--dry-run",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("ramping-vus"))
            .stderr(predicate::str::contains("40s -> 30 VUs"))
            .stderr(predicate::str::contains("Peak VUs:    30"))
            .stderr(predicate::str::contains("http_req_failed: rate<0.02"));
    }

    #[test]
    fn invalid_env_entry_fails() {
        loadstage()
            .args(["run", "http://localhost:8000", "-e", "NOVALUE", "--dry-run"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("KEY=VALUE"));
    }
}

mod init {
    use super::*;

    #[test]
    fn init_creates_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loadstage.toml");

        loadstage()
            .args(["init", "-o", config_path.to_str().unwrap()])
            .assert()
            .success()
            .stderr(predicate::str::contains("Created config file"));

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[scenarios.smoke]"));
        assert!(content.contains("[scenarios.load]"));
        assert!(content.contains("${BASE_URL:-http://localhost:8000}"));
        assert!(content.contains("\"http_req_duration{scenario:load}\""));
    }

    #[test]
    fn init_output_validates_as_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loadstage.toml");

        loadstage()
            .args(["init", "-o", config_path.to_str().unwrap()])
            .assert()
            .success();

        loadstage()
            .args(["run", "-f", config_path.to_str().unwrap(), "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Scenarios:   2 defined"))
            .stderr(predicate::str::contains("Thresholds:  4 defined"));
    }

    #[test]
    fn init_with_url_includes_url() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loadstage.toml");

        loadstage()
            .args([
                "init",
                "-o",
                config_path.to_str().unwrap(),
                "-u",
                "https://staging.example.com",
            ])
            .assert()
            .success();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("base_url = \"https://staging.example.com\""));
    }

    #[test]
    fn init_refuses_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loadstage.toml");
        fs::write(&config_path, "existing").unwrap();

        loadstage()
            .args(["init", "-o", config_path.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));

        assert_eq!(fs::read_to_string(&config_path).unwrap(), "existing");
    }

    #[test]
    fn init_overwrites_with_force() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loadstage.toml");
        fs::write(&config_path, "existing").unwrap();

        loadstage()
            .args(["init", "-o", config_path.to_str().unwrap(), "--force"])
            .assert()
            .success();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[defaults]"));
    }
}

mod completions {
    use super::*;

    #[test]
    fn generates_bash_completions() {
        loadstage()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("loadstage"));
    }

    #[test]
    fn generates_zsh_completions() {
        loadstage()
            .args(["completions", "zsh"])
            .assert()
            .success()
            .stdout(predicate::str::contains("#compdef loadstage"));
    }

    #[test]
    fn generates_man_page() {
        loadstage()
            .arg("man")
            .assert()
            .success()
            .stdout(predicate::str::contains(".TH"));
    }
}
