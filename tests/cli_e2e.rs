//! End-to-end CLI tests for the segfetch binary.

use std::collections::BTreeMap;

use assert_cmd::Command;
use predicates::prelude::*;
use segfetch_core::download::{ResumeRecord, ResumeStore};
use tempfile::TempDir;

mod support;
use support::range_server::{mount_ranged, payload};
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

/// Binary with user config isolated to `config_home`.
fn segfetch(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("segfetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    segfetch(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Segmented, resumable HTTP downloads"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    segfetch(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("segfetch"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let home = TempDir::new().unwrap();
    segfetch(&home).assert().failure();
}

#[test]
fn test_get_rejects_out_of_range_workers() {
    let home = TempDir::new().unwrap();
    segfetch(&home)
        .args(["get", "https://example.com/a.bin", "-w", "65"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("65"));
}

#[test]
fn test_get_output_conflicts_with_output_dir() {
    let home = TempDir::new().unwrap();
    segfetch(&home)
        .args([
            "get",
            "https://example.com/a.bin",
            "-o",
            "/tmp",
            "--output",
            "/tmp/a.bin",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_list_empty_directory() {
    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    segfetch(&home)
        .arg("list")
        .arg("-o")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no resumable transfers"));
}

#[tokio::test]
async fn test_list_shows_saved_record() {
    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    let store = ResumeStore::at(dir.path(), "movie.mp4");
    let record = ResumeRecord::new(
        "https://example.com/movie.mp4",
        "movie.mp4",
        1000,
        BTreeMap::from([(0, 250), (1, 0)]),
        2,
    );
    store.save(&record).await.unwrap();

    segfetch(&home)
        .arg("list")
        .arg("-o")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("movie.mp4"))
        .stdout(predicate::str::contains("250/1000"));
}

#[tokio::test]
async fn test_clear_removes_resume_state() {
    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    let store = ResumeStore::at(dir.path(), "movie.mp4");
    let record = ResumeRecord::new(
        "https://example.com/movie.mp4",
        "movie.mp4",
        1000,
        BTreeMap::from([(0, 0)]),
        1,
    );
    store.save(&record).await.unwrap();

    segfetch(&home)
        .args(["clear", "https://example.com/movie.mp4", "-o"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared"));
    assert!(!store.exists().await);

    // Clearing again is a no-op, not an error.
    segfetch(&home)
        .args(["clear", "https://example.com/movie.mp4", "-o"])
        .arg(dir.path())
        .assert()
        .success();
}

#[test]
fn test_get_invalid_url_fails() {
    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    segfetch(&home)
        .args(["-q", "get", "not a url", "-o"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_downloads_file_and_records_history() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let body = payload(2048);
    mount_ranged(&mock_server, "/data.bin", &body).await;

    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    segfetch(&home)
        .args(["-q", "get", "-w", "4", "-o"])
        .arg(dir.path())
        .arg(format!("{}/data.bin", mock_server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("2048 bytes"));

    assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), body);
    let history = std::fs::read_to_string(dir.path().join("downloads_history.json")).unwrap();
    assert!(history.contains("data.bin"));
}
