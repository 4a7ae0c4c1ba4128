//! CLI integration tests.
//!
//! Every test runs the `invsync` binary inside its own temporary directory,
//! so the default store and config paths never leak between tests.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../refresh/tests/fixtures/tower-3.2.2.json")
}

fn invsync(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("invsync");
    cmd.current_dir(dir.path())
        .env_remove("INVSYNC_STORE")
        .env_remove("INVSYNC_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn register(dir: &TempDir) {
    invsync(dir)
        .args(["register", "tower", "https://tower.example.com"])
        .assert()
        .success();
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Automation inventory refresh engine"));
}

#[test]
fn version_exits_0() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("invsync"));
}

// ──────────────────────────────────────────────
// 2. Validate
// ──────────────────────────────────────────────

#[test]
fn validate_fixture_exits_0() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .arg("validate")
        .arg(fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("139 payloads"));
}

#[test]
fn validate_json_reports_counts() {
    let dir = TempDir::new().unwrap();
    let output = invsync(&dir)
        .args(["--output", "json", "validate"])
        .arg(fixture())
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["valid"], true);
    assert_eq!(json["counts"]["credentials"], 17);
}

#[test]
fn validate_rejects_duplicate_refs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.json");
    fs::write(
        &path,
        r#"{"inventory_groups": [{"ref": "1", "name": "a"}, {"ref": "1", "name": "b"}]}"#,
    )
    .unwrap();
    invsync(&dir)
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid snapshot"));
}

#[test]
fn validate_rejects_schema_violation_as_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{"hosts": []}"#).unwrap();
    invsync(&dir)
        .args(["--output", "json", "validate"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"valid\": false"));
}

#[test]
fn validate_missing_file_exits_1() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .args(["validate", "nope.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error reading file"));
}

// ──────────────────────────────────────────────
// 3. Register and targets
// ──────────────────────────────────────────────

#[test]
fn register_then_list_targets() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    assert!(dir.path().join("invsync-store.json").exists());
    invsync(&dir)
        .arg("targets")
        .assert()
        .success()
        .stdout(predicate::str::contains("tower"))
        .stdout(predicate::str::contains("never refreshed"));
}

#[test]
fn register_twice_fails() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    invsync(&dir)
        .args(["register", "tower", "https://tower.example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already registered"));
}

#[test]
fn register_without_id_or_config_fails() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .arg("register")
        .assert()
        .failure()
        .stderr(predicate::str::contains("target id required"));
}

#[test]
fn register_reads_target_from_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("invsync.toml"),
        "[target]\nid = \"lab\"\nurl = \"https://lab.example.com\"\nverify_ssl = false\n",
    )
    .unwrap();
    let output = invsync(&dir)
        .args(["--output", "json", "register"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["id"], "lab");
    assert_eq!(json["verify_ssl"], false);
}

// ──────────────────────────────────────────────
// 4. Refresh and show
// ──────────────────────────────────────────────

#[test]
fn refresh_fixture_then_show() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    invsync(&dir)
        .args(["refresh", "tower", "--snapshot"])
        .arg(fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("refresh of 'tower' ok (api 3.2.2)"));

    let output = invsync(&dir)
        .args(["--output", "json", "show", "tower"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["target"]["api_version"], "3.2.2");
    assert_eq!(json["counts"]["configured_system"], 2);
    assert_eq!(json["counts"]["configuration_script"], 3);
    assert_eq!(json["counts"]["configuration_script_payload"], 139);

    invsync(&dir)
        .args(["show", "tower", "--kind", "configured_system"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello_vm [inventory hello_inventory]"));
}

#[test]
fn second_refresh_reports_unchanged_snapshot() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    for _ in 0..2 {
        invsync(&dir)
            .args(["--quiet", "refresh", "tower", "--snapshot"])
            .arg(fixture())
            .assert()
            .success();
    }
    let output = invsync(&dir)
        .args(["--output", "json", "refresh", "tower", "--snapshot"])
        .arg(fixture())
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["unchanged"], true);
    assert_eq!(json["outcome"]["status"], "ok");
    assert_eq!(json["stats"]["credential"]["created"], 0);
}

#[test]
fn refresh_with_counterparts_links_the_vm() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    let counterparts = dir.path().join("vms.json");
    fs::write(
        &counterparts,
        r#"{"4233080d-7467-de61-76c9-c8307b6e4830": "vm-42"}"#,
    )
    .unwrap();
    invsync(&dir)
        .args(["--quiet", "refresh", "tower", "--snapshot"])
        .arg(fixture())
        .arg("--counterparts")
        .arg(&counterparts)
        .assert()
        .success();

    let output = invsync(&dir)
        .args(["--output", "json", "show", "tower", "--kind", "configured_system"])
        .output()
        .unwrap();
    let records = stdout_json(&output);
    let vm = records
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["attributes"]["hostname"] == "hello_vm")
        .unwrap()
        .clone();
    assert_eq!(vm["attributes"]["counterpart"]["id"], "vm-42");
}

#[test]
fn concurrent_refreshes_of_different_targets_both_persist() {
    let dir = TempDir::new().unwrap();
    for id in ["east", "west"] {
        invsync(&dir)
            .args(["register", id, "https://tower.example.com"])
            .assert()
            .success();
    }

    std::thread::scope(|s| {
        for id in ["east", "west"] {
            let dir = &dir;
            s.spawn(move || {
                invsync(dir)
                    .args(["--quiet", "refresh", id, "--snapshot"])
                    .arg(fixture())
                    .assert()
                    .success();
            });
        }
    });

    for id in ["east", "west"] {
        let output = invsync(&dir)
            .args(["--output", "json", "show", id])
            .output()
            .unwrap();
        let json = stdout_json(&output);
        assert_eq!(json["counts"]["configuration_script_payload"], 139, "{id}");
        assert_eq!(json["target"]["api_version"], "3.2.2", "{id}");
    }
}

#[test]
fn refresh_failure_exits_2_and_is_recorded() {
    let dir = TempDir::new().unwrap();
    register(&dir);
    invsync(&dir)
        .args(["refresh", "tower", "--snapshot", "missing.json"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed: fetch failed"));

    invsync(&dir)
        .arg("targets")
        .assert()
        .success()
        .stdout(predicate::str::contains("failed at"));
}

#[test]
fn refresh_unknown_target_exits_1() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .args(["refresh", "ghost", "--snapshot"])
        .arg(fixture())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("target not found: ghost"));
}

#[test]
fn refresh_registers_configured_target_and_uses_snapshot_path() {
    let dir = TempDir::new().unwrap();
    let config = format!(
        "[target]\nid = \"lab\"\nurl = \"https://lab.example.com\"\n\n[fetch]\nsource = \"file\"\nsnapshot_path = \"{}\"\n\n[retirement]\nconfigured_system = \"hard\"\n",
        fixture().display().to_string().replace('\\', "\\\\")
    );
    fs::write(dir.path().join("invsync.toml"), config).unwrap();
    invsync(&dir)
        .arg("refresh")
        .assert()
        .success()
        .stdout(predicate::str::contains("refresh of 'lab' ok"));
}

#[test]
fn invalid_config_exits_1() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("invsync.toml"), "[fetch]\npage_size = 0\n").unwrap();
    invsync(&dir)
        .args(["refresh", "tower"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("page_size"));
}

#[test]
fn show_rejects_unknown_kind() {
    let dir = TempDir::new().unwrap();
    invsync(&dir)
        .args(["show", "tower", "--kind", "host"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown kind 'host'"));
}
