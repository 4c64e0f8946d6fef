use assert_cmd::prelude::*;
use serde_json::Value;
use std::process::Command;

fn pagewright() -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("pagewright");
    let mut cmd = Command::new(bin);
    cmd.env_remove("PAGEWRIGHT_CACHE_DIR");
    cmd
}

const ENTRY: &str = r##"{
  "version": 1,
  "instruction": "press go",
  "url": "https://example.test/form",
  "variableKeys": [],
  "actions": [{ "selector": "#go", "method": "click", "arguments": [], "description": "press go" }],
  "message": "clicked go",
  "actionDescription": "press go",
  "timestamp": "2026-01-02T03:04:05Z"
}"##;

#[test]
fn info_reports_the_build() {
    let assert = pagewright().arg("info").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    // stamped by the build script for every target of the package
    assert!(stdout.contains(&format!("Git Commit: {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"))));
    assert!(stdout.contains(&format!("Build Date: {}", env!("BUILD_DATE"))));
}

#[test]
fn cache_commands_work_on_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let key = "a".repeat(64);
    std::fs::write(dir.path().join(format!("{key}.json")), ENTRY).unwrap();
    let dir_arg = dir.path().to_str().unwrap();

    let assert = pagewright()
        .args(["--output", "json", "cache", "--dir", dir_arg, "list"])
        .assert()
        .success();
    let listing: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json listing");
    let rows = listing.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["key"].as_str(), Some(key.as_str()));
    assert_eq!(rows[0]["actions"].as_u64(), Some(1));

    let assert = pagewright()
        .args(["cache", "--dir", dir_arg, "show", &key])
        .assert()
        .success();
    let entry: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json entry");
    assert_eq!(entry["actions"][0]["selector"].as_str(), Some("#go"));

    pagewright()
        .args(["cache", "--dir", dir_arg, "show", &"b".repeat(64)])
        .assert()
        .failure();

    pagewright()
        .args(["cache", "--dir", dir_arg, "clear"])
        .assert()
        .success();
    assert!(!dir.path().join(format!("{key}.json")).exists());
}
