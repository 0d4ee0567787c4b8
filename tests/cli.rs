//! CLI test cases.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("prompt-improve").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_improve_offline_prints_a_prompt() {
    cmd()
        .arg("improve")
        .arg("write a function that reverses a string")
        .arg("--offline")
        .assert()
        .success()
        .stdout(predicate::str::contains("Confidence:"));
}

#[test]
fn test_improve_offline_json_is_valid() {
    let output = cmd()
        .arg("improve")
        .arg("explain how async/await works in rust")
        .arg("--offline")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(value.get("improved_prompt").is_some());
}

#[test]
fn test_improve_rejects_too_short_idea() {
    cmd()
        .arg("improve")
        .arg("hi")
        .arg("--offline")
        .assert()
        .failure();
}

#[test]
fn test_schema_prints_json_schema() {
    cmd()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ImprovementResult\""));
}

#[test]
fn test_history_list_with_no_history_is_not_an_error() {
    cmd().arg("history").arg("list").assert().success();
}
