#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd!

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;
use serde_json::json;

fn seed_tcloud(project: &TestProject) {
    project.write_inventory(
        "tcloud",
        "acc-1",
        "ap-guangzhou",
        "vpc",
        json!([
            {"cloud_id": "vpc-1", "resource_type": "vpc", "name": "main", "status": "AVAILABLE"},
            {"cloud_id": "vpc-2", "resource_type": "vpc", "name": "backup", "status": "AVAILABLE"},
            {"cloud_id": "vpc-3", "resource_type": "vpc", "name": "lab", "status": "AVAILABLE"}
        ]),
    );
    project.write_inventory(
        "tcloud",
        "acc-1",
        "ap-guangzhou",
        "disk",
        json!([{"cloud_id": "disk-1", "resource_type": "disk", "status": "ATTACHED"}]),
    );
    project.write_inventory(
        "tcloud",
        "acc-1",
        "ap-guangzhou",
        "cvm",
        json!([
            {
                "cloud_id": "ins-1",
                "resource_type": "cvm",
                "status": "RUNNING",
                "relations": [{"resource_type": "disk", "cloud_id": "disk-1"}]
            },
            {"cloud_id": "ins-2", "resource_type": "cvm", "status": "LAUNCH_FAILED"}
        ]),
    );
}

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("cloudmirror").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("check-auth"))
        .stdout(predicate::str::contains("wait"));
}

#[test]
fn test_sync_help() {
    let mut cmd = Command::cargo_bin("cloudmirror").unwrap();
    cmd.args(["sync", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--inventory"))
        .stdout(predicate::str::contains("--region"));
}

#[test]
fn test_unknown_vendor_rejected() {
    let project = TestProject::new();
    project
        .cloudmirror()
        .args(["check-auth", "--vendor", "oracle", "--account", "acc-1", "--inventory"])
        .arg(project.inventory())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not support"));
}

#[test]
fn test_sync_then_status() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--inventory"])
        .arg(project.inventory())
        .arg("--state")
        .arg(project.state())
        .assert()
        .success()
        .stdout(predicate::str::contains("ap-guangzhou"))
        .stdout(predicate::str::contains("vpc"))
        .stdout(predicate::str::contains("synced"));

    let state = project.read_state();
    let records = state["records"].as_object().unwrap();
    assert_eq!(records.len(), 6);
    assert!(
        state["relations"]
            .as_object()
            .unwrap()
            .values()
            .any(|edges| edges.to_string().contains("disk-1"))
    );

    project
        .cloudmirror()
        .args(["status", "--vendor", "tcloud", "--account", "acc-1", "--type", "vpc", "--state"])
        .arg(project.state())
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc"))
        .stdout(predicate::str::contains("success"))
        .stdout(predicate::str::contains("cvm").not());
}

/// A second run inside the cooldown skips every type
#[test]
fn test_sync_frequency_limited() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--type", "vpc"])
        .arg("--inventory")
        .arg(project.inventory())
        .arg("--state")
        .arg(project.state())
        .assert()
        .success()
        .stdout(predicate::str::contains("synced"));

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--type", "vpc"])
        .arg("--inventory")
        .arg(project.inventory())
        .arg("--state")
        .arg(project.state())
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"))
        .stdout(predicate::str::contains("frequency"));
}

/// A mistyped inventory path fails the run instead of emptying the store
#[test]
fn test_sync_with_missing_inventory_keeps_records() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--inventory"])
        .arg(project.inventory())
        .arg("--state")
        .arg(project.state())
        .assert()
        .success();
    assert_eq!(project.read_state()["records"].as_object().unwrap().len(), 6);
    project.clear_statuses();

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--region", "ap-guangzhou"])
        .arg("--inventory")
        .arg(project.path().join("inventroy"))
        .arg("--state")
        .arg(project.state())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed"));

    assert_eq!(project.read_state()["records"].as_object().unwrap().len(), 6);
}

#[test]
fn test_sync_disabled_by_config() {
    let project = TestProject::new();
    seed_tcloud(&project);
    project.write_config("cloud_resource:\n  sync:\n    enable: false\n");

    project
        .cloudmirror()
        .args(["sync", "--vendor", "tcloud", "--account", "acc-1", "--inventory"])
        .arg(project.inventory())
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));
}

#[test]
fn test_invalid_config_fails() {
    let project = TestProject::new();
    project.write_config("cloud_resource:\n  sync:\n    sync_frequency_limiting_time_min: 1\n");

    project
        .cloudmirror()
        .args(["status", "--vendor", "aws", "--account", "acc-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_status_without_runs() {
    let project = TestProject::new();

    project
        .cloudmirror()
        .args(["status", "--vendor", "aws", "--account", "123456789012", "--state"])
        .arg(project.state())
        .assert()
        .success()
        .stdout(predicate::str::contains("No sync recorded"));
}

#[test]
fn test_check_auth() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args(["check-auth", "--vendor", "tcloud", "--account", "acc-1", "--inventory"])
        .arg(project.inventory())
        .assert()
        .success()
        .stdout(predicate::str::contains("acc-1"));

    project
        .cloudmirror()
        .args(["check-auth", "--vendor", "tcloud", "--account", "acc-2", "--inventory"])
        .arg(project.inventory())
        .assert()
        .failure()
        .stdout(predicate::str::contains("acc-2"));
}

#[test]
fn test_wait_reaches_state() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args([
            "wait", "--vendor", "tcloud", "--account", "acc-1", "--region", "ap-guangzhou",
            "--type", "cvm", "--id", "ins-1", "--success", "running", "--inventory",
        ])
        .arg(project.inventory())
        .assert()
        .success()
        .stdout(predicate::str::contains("ins-1"))
        .stdout(predicate::str::contains("expected state"));
}

#[test]
fn test_wait_reports_failed_target() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args([
            "wait", "--vendor", "tcloud", "--account", "acc-1", "--region", "ap-guangzhou",
            "--type", "cvm", "--id", "ins-1", "--id", "ins-2", "--success", "RUNNING",
            "--failed", "LAUNCH_FAILED", "--inventory",
        ])
        .arg(project.inventory())
        .assert()
        .failure()
        .stdout(predicate::str::contains("ins-2"))
        .stderr(predicate::str::contains("1 target(s) failed"));
}

/// Targets missing from the inventory stay unknown until the timeout
#[test]
fn test_wait_times_out() {
    let project = TestProject::new();
    seed_tcloud(&project);

    project
        .cloudmirror()
        .args([
            "wait", "--vendor", "tcloud", "--account", "acc-1", "--region", "ap-guangzhou",
            "--type", "cvm", "--id", "ins-404", "--success", "RUNNING", "--interval", "1",
            "--timeout", "1", "--inventory",
        ])
        .arg(project.inventory())
        .assert()
        .failure()
        .stdout(predicate::str::contains("ins-404"))
        .stderr(predicate::str::contains("timed out"));
}
