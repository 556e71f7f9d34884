//! End-to-end CLI integration tests
//!
//! These tests run the attempt-runner binary against the built-in simulation
//! backend with every wait disabled through environment overrides.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

/// Command running inside `dir` with zero waits and a certain simulation
fn runner_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("attempt-runner").unwrap();
    cmd.current_dir(dir.path())
        .env("RUST_LOG", "warn")
        .env("ATTEMPT_RUNNER__WORKFLOW__CODE_POLL_INTERVAL_MS", "0")
        .env("ATTEMPT_RUNNER__WORKFLOW__CHALLENGE_POLL_INTERVAL_MS", "0")
        .env("ATTEMPT_RUNNER__WORKFLOW__SUBMIT_RETRY_DELAY_MS", "0")
        .env("ATTEMPT_RUNNER__WORKFLOW__ATTEMPT_BACKOFF_MS", "0")
        .env("ATTEMPT_RUNNER__WORKFLOW__STARTUP_JITTER_MS", "0")
        .env("ATTEMPT_RUNNER__SIMULATION__LATENCY_MS", "0")
        .env("ATTEMPT_RUNNER__SIMULATION__CODE_DELIVERY_RATE", "1.0")
        .env("ATTEMPT_RUNNER__SIMULATION__VERIFY_ACCEPT_RATE", "1.0")
        .env("ATTEMPT_RUNNER__SIMULATION__CHALLENGE_SOLVE_RATE", "1.0")
        .env("ATTEMPT_RUNNER__SIMULATION__CODE_INVALID_RATE", "0.0");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("attempt-runner").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("init-config"));
}

#[test]
fn test_run_help_lists_flags() {
    let mut cmd = Command::cargo_bin("attempt-runner").unwrap();

    cmd.args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--max-attempts"))
        .stdout(predicate::str::contains("--metrics-file"))
        .stdout(predicate::str::contains("--keep-success-resource"));
}

#[test]
fn test_init_config_writes_settings_once() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("attempt-runner")
        .unwrap()
        .current_dir(dir.path())
        .arg("init-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("attempt-runner.toml"));

    let written = std::fs::read_to_string(dir.path().join("attempt-runner.toml")).unwrap();
    assert!(written.contains("[run]"));
    assert!(written.contains("[workflow]"));

    Command::cargo_bin("attempt-runner")
        .unwrap()
        .current_dir(dir.path())
        .arg("init-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_run_reaches_target_and_writes_artifacts() {
    let dir = TempDir::new().unwrap();

    runner_cmd(&dir)
        .env("ATTEMPT_RUNNER__SIMULATION__SUBMIT_ACCEPT_RATE", "1.0")
        .args([
            "run",
            "--workers",
            "2",
            "--target",
            "3",
            "--metrics-file",
            "metrics.jsonl",
            "--output-file",
            "successes.txt",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("target_reached"));

    let successes = std::fs::read_to_string(dir.path().join("successes.txt")).unwrap();
    assert!(successes.lines().count() >= 3);
    assert!(successes.lines().all(|line| line.starts_with("sso-")));

    let metrics = std::fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
    assert!(metrics.lines().all(|line| serde_json::from_str::<serde_json::Value>(line).is_ok()));
    assert!(metrics.contains("\"stage\":\"summary\""));
}

#[test]
fn test_attempt_limit_exits_successfully() {
    let dir = TempDir::new().unwrap();

    runner_cmd(&dir)
        .env("ATTEMPT_RUNNER__SIMULATION__SUBMIT_ACCEPT_RATE", "0.0")
        .args([
            "run",
            "--workers",
            "2",
            "--target",
            "5",
            "--max-attempts",
            "4",
            "--metrics-file",
            "metrics.jsonl",
            "--output-file",
            "successes.txt",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("attempt_limit"))
        .stdout(predicate::str::contains("Attempts: 4/4"));
}
