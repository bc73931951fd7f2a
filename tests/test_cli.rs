mod common;

use common::{fixture_path, spawn_command};
use serde_json::Value;

#[test]
fn validate_valid_protocol() {
    let config = fixture_path("valid_protocol.yaml");
    let output = spawn_command(&["validate", config.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "validate should succeed for valid protocol: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("valid (0 warnings)"), "stdout: {stdout}");
}

#[test]
fn validate_invalid_protocol() {
    let config = fixture_path("invalid_protocol.yaml");
    let output = spawn_command(&["validate", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("invalid"), "stdout: {stdout}");
    assert!(stdout.contains("did you mean 'fixation'"), "stdout: {stdout}");
    assert!(stdout.contains("probe"), "stdout: {stdout}");
}

#[test]
fn validate_json_output() {
    let config = fixture_path("valid_protocol.yaml");
    let output = spawn_command(&["validate", "--format", "json", config.to_str().unwrap()]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: Value = serde_json::from_str(stdout.trim()).expect("output should be valid JSON");
    assert_eq!(parsed["valid"], true);
    assert!(parsed["errors"].as_array().is_some_and(Vec::is_empty));
}

#[test]
fn validate_missing_file() {
    let output = spawn_command(&["validate", "/tmp/nonexistent_trialsync_protocol.yaml"]);
    assert!(!output.status.success());
}

#[test]
fn run_writes_event_stream() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    let config = fixture_path("valid_protocol.yaml");
    let output = spawn_command(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--trials",
        "1",
        "--events-file",
        events.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "run should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 trial(s) completed (Completed)"), "stdout: {stdout}");

    let lines: Vec<Value> = std::fs::read_to_string(&events)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["type"], "RunStarted");
    assert_eq!(lines.last().unwrap()["type"], "RunStopped");
    assert_eq!(lines.last().unwrap()["trials_completed"], 1);
}

#[test]
fn run_rejects_invalid_protocol() {
    let config = fixture_path("invalid_protocol.yaml");
    let output = spawn_command(&["run", "--config", config.to_str().unwrap(), "-q"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn version_json() {
    let output = spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["name"], "trialsync");
    assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
}
