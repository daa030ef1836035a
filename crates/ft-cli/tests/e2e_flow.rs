//! End-to-end tests driving the `ft` binary.
//!
//! Tests the full pipeline: add → timeline → check → fix → check

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn ft_binary() -> String {
    env!("CARGO_BIN_EXE_ft").to_string()
}

/// Runs `ft` with an isolated home so the default config and database
/// locations live under `home`.
fn ft(home: &Path, args: &[&str]) -> Output {
    Command::new(ft_binary())
        .env("HOME", home)
        .env_remove("XDG_DATA_HOME")
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("FT_DATABASE_PATH")
        .env_remove("FT_FAIL_ON_ERROR")
        .env_remove("FT_FIX")
        .args(args)
        .output()
        .expect("failed to run ft")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "ft should succeed: {}{}",
        stdout(output),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn add(home: &Path, args: &[&str]) {
    let mut full = vec!["add"];
    full.extend_from_slice(args);
    assert_success(&ft(home, &full));
}

#[test]
fn test_consistent_timeline_checks_ok() {
    let temp = TempDir::new().unwrap();
    add(
        temp.path(),
        &["--field", "sleep", "--at", "2024-01-02T07:00:00Z", "--duration", "PT8H"],
    );
    add(
        temp.path(),
        &["--field", "sleep", "--at", "2024-01-03T07:30:00Z", "--duration", "PT7H"],
    );

    let output = ft(temp.path(), &["check", "--field", "sleep"]);
    assert_success(&output);
    assert_eq!(stdout(&output).trim(), "sleep: ok");

    // The default database lives under the data dir
    assert!(temp.path().join(".local/share/ft/ft.db").exists());
}

#[test]
fn test_broken_link_fails_then_fix_heals_it() {
    let temp = TempDir::new().unwrap();
    add(
        temp.path(),
        &["--field", "mood", "--at", "2024-01-01T08:00:00Z", "--id", "m1", "--state", "happy"],
    );
    add(
        temp.path(),
        &[
            "--field",
            "mood",
            "--at",
            "2024-01-01T12:00:00Z",
            "--id",
            "m2",
            "--state",
            "tired",
            "--last-state",
            "calm",
        ],
    );

    let output = ft(temp.path(), &["check", "--field", "mood"]);
    assert!(!output.status.success(), "broken chain should fail the check");
    assert!(stdout(&output).contains("lastState of m2"), "{}", stdout(&output));

    let output = ft(temp.path(), &["check", "--field", "mood", "--fix", "--json"]);
    assert!(!output.status.success(), "a repaired problem is still reported");
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["fixes"][0]["eventId"], "m2");
    assert_eq!(report["fixes"][0]["lastState"], "happy");

    let output = ft(temp.path(), &["check", "--field", "mood"]);
    assert_success(&output);
}

#[test]
fn test_overlap_is_reported_not_fixed() {
    let temp = TempDir::new().unwrap();
    add(
        temp.path(),
        &["--field", "work", "--at", "2024-01-01T12:00:00Z", "--id", "outer", "--duration", "PT3H"],
    );
    add(
        temp.path(),
        &[
            "--field",
            "work",
            "--at",
            "2024-01-01T11:00:00Z",
            "--id",
            "inner",
            "--duration",
            "PT1H",
            "--last-state",
            "false",
        ],
    );

    let output = ft(
        temp.path(),
        &["check", "--field", "work", "--fix", "--accumulate", "--json"],
    );
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let errors = report["errors"].as_array().unwrap();
    assert!(!errors.is_empty());
    assert!(
        errors
            .iter()
            .all(|err| err["kind"] == "overlapping_block"),
        "{report}"
    );
    assert!(report.get("fixes").is_none());
}

#[test]
fn test_check_all_and_fields() {
    let temp = TempDir::new().unwrap();
    add(
        temp.path(),
        &["--field", "sleep", "--at", "2024-01-02T07:00:00Z", "--duration", "PT8H"],
    );
    add(
        temp.path(),
        &["--field", "mood", "--at", "2024-01-01T08:00:00Z", "--state", "happy"],
    );

    let output = ft(temp.path(), &["check", "--all"]);
    assert_success(&output);
    assert_eq!(stdout(&output), "mood: ok\nsleep: ok\n");

    let output = ft(temp.path(), &["fields"]);
    assert_success(&output);
    let listing = stdout(&output);
    assert!(listing.contains("mood: 1 event"), "{listing}");
    assert!(listing.contains("sleep: 1 event"), "{listing}");
}

#[test]
fn test_timeline_json_keeps_offsets() {
    let temp = TempDir::new().unwrap();
    add(
        temp.path(),
        &[
            "--field",
            "sleep",
            "--at",
            "2024-01-02T07:00:00+01:00",
            "--id",
            "night",
            "--duration",
            "PT8H",
        ],
    );

    let output = ft(temp.path(), &["timeline", "--field", "sleep", "--json"]);
    assert_success(&output);
    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["timestamp"], "2024-01-01T23:00:00+01:00");
    assert_eq!(rows[0]["kind"], "block_open");
    assert_eq!(rows[1]["kind"], "block_close");
}

#[test]
fn test_config_file_selects_database() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("custom.db");
    let config_path = temp.path().join("ft.toml");
    std::fs::write(
        &config_path,
        format!("database_path = {:?}\n", db_path.display().to_string()),
    )
    .unwrap();

    let output = ft(
        temp.path(),
        &[
            "--config",
            config_path.to_str().unwrap(),
            "add",
            "--field",
            "sleep",
            "--at",
            "2024-01-02T07:00:00Z",
        ],
    );
    assert_success(&output);
    assert!(db_path.exists());
    assert!(!temp.path().join(".local/share/ft/ft.db").exists());
}

#[test]
fn test_rejects_malformed_duration() {
    let temp = TempDir::new().unwrap();
    let output = ft(
        temp.path(),
        &["add", "--field", "sleep", "--at", "2024-01-02T07:00:00Z", "--duration", "8h"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("8h"));
}
