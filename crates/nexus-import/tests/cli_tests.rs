//! CLI binary tests

use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn nexus_import() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nexus-import"))
}

/// Test that the binary shows help
#[test]
fn test_cli_help() {
    let output = nexus_import().arg("--help").output().expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("import"));
    assert!(stdout.contains("counts"));
}

/// Test a full import followed by a counts lookup
#[test]
fn test_import_then_counts() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let relationships = dir.path().join("relationships.jsonl");
    fs::write(
        &nodes,
        "{\"id\": \"x\", \"labels\": [2]}\n{\"id\": \"y\", \"labels\": [2]}\n",
    )
    .unwrap();
    fs::write(&relationships, "{\"start\": \"x\", \"end\": \"y\", \"type\": 0}\n").unwrap();
    let store = dir.path().join("store");

    let output = nexus_import()
        .arg("import")
        .arg("--into")
        .arg(&store)
        .arg("--nodes")
        .arg(&nodes)
        .arg("--relationships")
        .arg(&relationships)
        .args(["--processors", "2"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["nodes"], 2);
    assert_eq!(summary["relationships"], 1);

    let output = nexus_import()
        .arg("counts")
        .arg("--store")
        .arg(&store)
        .args(["--label", "2"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let counts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(counts["nodes"], 2);
    assert_eq!(counts["relationships"], 1);
}

/// Test that a failed import exits with an error
#[test]
fn test_missing_nodes_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = nexus_import()
        .arg("import")
        .arg("--into")
        .arg(dir.path().join("store"))
        .arg("--nodes")
        .arg(dir.path().join("missing.jsonl"))
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}
