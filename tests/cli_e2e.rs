//! End-to-end CLI tests for the pmcfetch binary.
//!
//! None of these reach the network: each exits before identifiers are
//! resolved.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary with config lookup and all output confined to `dir`.
fn pmcfetch(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pmcfetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env_remove("RUST_LOG")
        .arg("--cache-dir")
        .arg(dir.join("cache"))
        .arg("--output-dir")
        .arg(dir.join("pdfs"));
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("pmcfetch").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("open-access PDFs"))
        .stdout(predicate::str::contains("--ambiguous-default"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("pmcfetch").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pmcfetch"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("pmcfetch").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_without_input_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    pmcfetch(dir.path()).write_stdin("").assert().success();
    assert!(!dir.path().join("pdfs").join("download_results.json").exists());
}

#[test]
fn test_binary_clear_cache_without_input() {
    let dir = TempDir::new().unwrap();
    pmcfetch(dir.path())
        .arg("--clear-cache")
        .arg("-v")
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains("cache cleared"));
}

#[test]
fn test_binary_rejects_unknown_config_key() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "colour = \"blue\"\n").unwrap();

    pmcfetch(dir.path())
        .arg("--config")
        .arg(&config)
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_binary_reports_missing_csv_column() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("papers.csv");
    std::fs::write(&csv, "Title,PMCID\nA paper,PMC1\n").unwrap();

    pmcfetch(dir.path())
        .arg("--input")
        .arg(&csv)
        .arg("--column")
        .arg("doi")
        .assert()
        .failure()
        .stderr(predicate::str::contains("column 'doi' not found"))
        .stderr(predicate::str::contains("Title, PMCID"));
}

#[test]
fn test_binary_rejects_zero_concurrency() {
    let dir = TempDir::new().unwrap();
    pmcfetch(dir.path())
        .args(["-c", "0", "PMC1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}
