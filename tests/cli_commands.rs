//! End-to-end tests of the `arcd` binary
//!
//! - Human output carries a summary line
//! - `--json` output parses
//! - Integrity conflicts, corruption, missing volumes and partial failures
//!   exit non-zero

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::TestArchive;

fn arcd(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_arcd"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("ARCD_CRASH_POINT")
        .output()
        .expect("failed to run arcd")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn archive_with_volume() -> (TestArchive, std::path::PathBuf) {
    let archive = TestArchive::new();
    archive.write("docs/a.txt", b"alpha");
    archive.write("docs/deep/b.txt", b"bravo");
    let config = archive.write_config();

    let dest = archive.volume_dir("vol1");
    let output = arcd(&config, &["build", dest.to_str().unwrap(), "docs"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("added 2, skipped 0, deferred 0, failed 0"));

    let output = arcd(&config, &["index"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    (archive, config)
}

#[test]
fn test_list_and_find() {
    let (_archive, config) = archive_with_volume();

    let output = arcd(&config, &["list", "docs"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("deep/"));
    assert!(text.contains("a.txt"));
    assert!(text.contains("1 directory, 1 file"));

    let output = arcd(&config, &["find", "*.txt", "--json"]);
    assert!(output.status.success());
    let found: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let paths: Vec<&str> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["docs/a.txt", "docs/deep/b.txt"]);
}

#[test]
fn test_list_unknown_directory_fails() {
    let (_archive, config) = archive_with_volume();
    let output = arcd(&config, &["list", "nowhere"]);
    assert_eq!(output.status.code(), Some(7));
}

#[test]
fn test_volumes_json() {
    let (_archive, config) = archive_with_volume();
    let output = arcd(&config, &["volumes", "--json"]);
    assert!(output.status.success());

    let volumes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let volumes = volumes.as_array().unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0]["files"], 2);
    assert_eq!(volumes[0]["status"], "active");
    assert_eq!(volumes[0]["attached"], true);
}

#[test]
fn test_destroyed_then_reactivate() {
    let (archive, config) = archive_with_volume();
    let label = archive.open().registry().volumes().next().unwrap().label.clone();

    let output = arcd(&config, &["destroyed", &label]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No copy left (2)"));

    let output = arcd(&config, &["reactivate", &label]);
    assert!(output.status.success());
    let output = arcd(&config, &["index"]);
    assert!(output.status.success());
    assert_eq!(archive.open().index().len(), 2);
}

#[test]
fn test_conflict_exits_non_zero() {
    let (archive, config) = archive_with_volume();
    archive.write("docs/a.txt", b"alpha, edited");
    let dest = archive.volume_dir("vol2");
    let output = arcd(&config, &["build", dest.to_str().unwrap(), "docs"]);
    assert!(output.status.success());

    let output = arcd(&config, &["index"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stdout(&output).contains("Integrity conflicts (1)"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ARCD_INTEGRITY_CONFLICT"));

    let output = arcd(&config, &["list", "docs"]);
    assert!(output.status.success());
    let conflicted: Vec<String> = stdout(&output)
        .lines()
        .filter(|line| line.contains("CONFLICT"))
        .map(str::to_string)
        .collect();
    assert_eq!(conflicted.len(), 1, "{:?}", conflicted);
    assert!(conflicted[0].starts_with("a.txt"));

    let output = arcd(&config, &["find", "*.txt", "--json"]);
    let found: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let flags: Vec<(&str, bool)> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (e["path"].as_str().unwrap(), e["conflicted"].as_bool().unwrap()))
        .collect();
    assert_eq!(flags, vec![("docs/a.txt", true), ("docs/deep/b.txt", false)]);
}

#[test]
fn test_corrupt_volume_exits_non_zero() {
    let archive = TestArchive::without_repair();
    archive.write("docs/a.txt", b"alpha content to damage");
    let config = archive.write_config();
    let dest = archive.volume_dir("vol1");
    assert!(arcd(&config, &["build", dest.to_str().unwrap(), "docs"]).status.success());

    let label = archive.open().registry().volumes().next().unwrap().label.clone();
    archive.damage_bundle("vol1", &label, b"alpha content");

    let output = arcd(&config, &["verify"]);
    assert_eq!(output.status.code(), Some(5));
    assert!(stdout(&output).contains("CORRUPT"));
}

#[test]
fn test_restore_unknown_path_not_found() {
    let (archive, config) = archive_with_volume();
    let target = archive.restored();
    let output = arcd(
        &config,
        &["restore", "docs", "missing.txt", "--yes", "--to", target.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(7));
    assert!(stdout(&output).contains("missing.txt"));
    assert_eq!(std::fs::read(target.join("docs/deep/b.txt")).unwrap(), b"bravo");
}

#[test]
fn test_restore_mixed_failures_exit_partial() {
    let (archive, config) = archive_with_volume();
    archive.write("later/c.txt", b"charlie");
    let dest = archive.volume_dir("vol2");
    assert!(arcd(&config, &["build", dest.to_str().unwrap(), "later"]).status.success());
    assert!(arcd(&config, &["index"]).status.success());
    std::fs::remove_dir_all(&dest).unwrap();

    let target = archive.restored();
    let output = arcd(
        &config,
        &[
            "restore", "docs", "later", "missing.txt", "--yes", "--timeout", "0", "--to",
            target.to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn test_restore_missing_volume_exits_unavailable() {
    let (archive, config) = archive_with_volume();
    std::fs::remove_dir_all(archive.volume_dir("vol1")).unwrap();

    let target = archive.restored();
    let output = arcd(
        &config,
        &["restore", "docs", "--yes", "--timeout", "0", "--to", target.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ARCD_UNAVAILABLE"));
}

#[test]
fn test_restore_huge_timeout_is_accepted() {
    let (archive, config) = archive_with_volume();
    let target = archive.restored();
    let huge = u64::MAX.to_string();
    let output = arcd(
        &config,
        &["restore", "docs", "--yes", "--timeout", &huge, "--to", target.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}
