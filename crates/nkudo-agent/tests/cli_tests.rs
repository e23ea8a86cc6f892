//! Integration tests for the `nkudo-agent` CLI binary.
//!
//! These exercise the binary as a subprocess and check exit codes and
//! output; none of them require a reachable control plane.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

fn agent_bin() -> String {
    let path = env!("CARGO_BIN_EXE_nkudo-agent");
    assert!(Path::new(path).exists(), "nkudo-agent binary not found at {path}");
    path.to_owned()
}

fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(agent_bin())
        .args(args)
        .env_remove("NKUDO_ENROLL_TOKEN")
        .output()
        .expect("failed to execute nkudo-agent");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "--version should exit 0");
    assert!(stdout.contains("nkudo-agent"), "version output should mention nkudo-agent: {stdout}");
}

#[test]
fn test_help_lists_all_verbs() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "--help should exit 0");
    for verb in [
        "enroll",
        "run",
        "hostfacts",
        "apply",
        "verify-heartbeat",
        "status",
        "check",
        "unenroll",
        "renew",
        "version",
    ] {
        assert!(stdout.contains(verb), "help should list '{verb}': {stdout}");
    }
}

#[test]
fn test_enroll_without_token_fails_with_config_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (code, _, stderr) = run(&[
        "enroll",
        "--control-plane",
        "https://127.0.0.1:19999",
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
        "--pki-dir",
        dir.path().join("pki").to_str().unwrap(),
    ]);
    assert_eq!(code, 1, "enrollment with no token should exit 1 (config error): {stderr}");
    assert!(stderr.contains("token"), "should mention the missing token: {stderr}");
}

#[test]
fn test_run_without_control_plane_is_a_usage_error() {
    let (code, _, stderr) = run(&["run"]);
    assert_ne!(code, 0, "run without --control-plane should fail");
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "clap should report the missing required flag: {stderr}"
    );
}

#[test]
fn test_hostfacts_runs_without_network() {
    let (code, _, stderr) = run(&["hostfacts"]);
    assert_eq!(code, 0, "hostfacts should never need the control plane: {stderr}");
}

#[test]
fn test_status_without_enrollment_fails_with_config_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (code, _, stderr) = run(&[
        "status",
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
        "--pki-dir",
        dir.path().join("pki").to_str().unwrap(),
    ]);
    assert_eq!(code, 1, "status before enrollment should exit 1: {stderr}");
    assert!(stderr.contains("not enrolled"), "should explain why: {stderr}");
}

#[test]
fn test_check_without_enrollment_reports_problems() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (code, _, stderr) = run(&[
        "check",
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
        "--pki-dir",
        dir.path().join("pki").to_str().unwrap(),
    ]);
    assert_eq!(code, 2, "check on empty state should fail with a runtime error: {stderr}");
}

#[test]
fn test_apply_rejects_malformed_plan_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, "not json").expect("write plan file");

    let (code, _, stderr) = run(&[
        "apply",
        "--file",
        plan_path.to_str().unwrap(),
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
    ]);
    assert_eq!(code, 2, "malformed plan file should fail: {stderr}");
}

#[test]
fn test_apply_executes_empty_plan_successfully() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, "[]").expect("write plan file");

    let (code, _, stderr) = run(&[
        "apply",
        "--file",
        plan_path.to_str().unwrap(),
        "--state-dir",
        dir.path().join("state").to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "an empty plan has nothing to fail on: {stderr}");
}
