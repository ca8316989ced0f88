//! End-to-end tests for the gnode binary.
//!
//! Each test generates a small dataset with `gnode generate`, groups it and
//! checks the output file and exit status.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_gnode(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gnode"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute gnode")
}

fn generate(dir: &Path, format: &str) {
    let output = run_gnode(&[
        "generate",
        "-o",
        dir.to_str().unwrap(),
        "--nodes",
        "30",
        "--reads",
        "500",
        "--format",
        format,
        "--malformed-rate",
        "0.05",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_group_json_lines() {
    let dir = TempDir::new().unwrap();
    generate(dir.path(), "json");
    let out = dir.path().join("grouped.json");

    let output = run_gnode(&[
        "-t",
        "4",
        "--stats",
        "group",
        "-n",
        dir.path().join("nodes.json").to_str().unwrap(),
        "-i",
        dir.path().join("reads.jsonl").to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "-B",
        "25",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Records read:"));

    let grouped = read_json(&out);
    let nodes = grouped.as_object().unwrap();
    assert!(!nodes.is_empty());
    for (id, group) in nodes {
        assert_eq!(group["id"].as_str().unwrap(), id);
        assert!(group["reads"].as_array().unwrap().iter().all(|r| r["read_name"].is_string()));
    }

    // Checkpoints are cleaned up after a successful run.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".batch_"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn test_group_frames() {
    let dir = TempDir::new().unwrap();
    generate(dir.path(), "frames");
    let out = dir.path().join("grouped.json");

    let output = run_gnode(&[
        "group",
        "-n",
        dir.path().join("nodes.json").to_str().unwrap(),
        "-i",
        dir.path().join("reads.bin").to_str().unwrap(),
        "-f",
        "frames",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(read_json(&out).is_object());
}

#[test]
fn test_keep_checkpoints_then_merge() {
    let dir = TempDir::new().unwrap();
    generate(dir.path(), "json");
    let out = dir.path().join("grouped.json");
    let checkpoints = dir.path().join("checkpoints");

    let output = run_gnode(&[
        "group",
        "-n",
        dir.path().join("nodes.json").to_str().unwrap(),
        "-i",
        dir.path().join("reads.jsonl").to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "-B",
        "10",
        "--checkpoint-dir",
        checkpoints.to_str().unwrap(),
        "--keep-checkpoints",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(fs::read_dir(&checkpoints).unwrap().count() > 1);

    let merged = dir.path().join("merged.json");
    let renamed_dir = dir.path().join("renamed");
    fs::create_dir(&renamed_dir).unwrap();
    for entry in fs::read_dir(&checkpoints).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().replace("grouped.json", "merged.json");
        fs::copy(entry.path(), renamed_dir.join(name)).unwrap();
    }

    let output = run_gnode(&[
        "merge",
        "-o",
        merged.to_str().unwrap(),
        "--checkpoint-dir",
        renamed_dir.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(fs::read(&out).unwrap(), fs::read(&merged).unwrap());
    assert_eq!(fs::read_dir(&renamed_dir).unwrap().count(), 0);
}

#[test]
fn test_missing_index_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("grouped.json");
    let output = run_gnode(&[
        "group",
        "-n",
        dir.path().join("missing.json").to_str().unwrap(),
        "-x",
        "true",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: index:"));
    assert!(!out.exists());
}

#[test]
fn test_requires_a_stream() {
    let dir = TempDir::new().unwrap();
    generate(dir.path(), "json");
    let output = run_gnode(&[
        "group",
        "-n",
        dir.path().join("nodes.json").to_str().unwrap(),
        "-o",
        dir.path().join("grouped.json").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: config:"));
}

#[test]
fn test_frames_rejected_for_piped_streams() {
    let dir = TempDir::new().unwrap();
    generate(dir.path(), "json");
    let out = dir.path().join("grouped.json");
    let output = run_gnode(&[
        "group",
        "-n",
        dir.path().join("nodes.json").to_str().unwrap(),
        "-x",
        "cat /dev/null",
        "-f",
        "frames",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: config:"));
    assert!(!out.exists());
}
