//! Offline CLI commands.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_normalize_command() {
    Command::cargo_bin("carto-sync")
        .unwrap()
        .args(["--quiet", "normalize", "My Cities", "SELECT", "201moore"])
        .assert()
        .success()
        .stdout("my_cities\n_select\n_201moore\n");
}

#[test]
fn test_normalize_json() {
    Command::cargo_bin("carto-sync")
        .unwrap()
        .args(["--quiet", "--json", "normalize", "Field: 2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"field_2\""));
}

#[test]
fn test_init_writes_sample_config() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("carto-sync.toml");

    Command::cargo_bin("carto-sync")
        .unwrap()
        .args(["--quiet", "init", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let config = carto_sync::SyncConfig::from_file(&output).unwrap();
    assert_eq!(config.retry.retry_times, 3);
}

#[test]
fn test_rejects_unknown_if_exists() {
    Command::cargo_bin("carto-sync")
        .unwrap()
        .args(["write", "data.csv", "cities", "--if-exists", "merge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("merge"));
}
