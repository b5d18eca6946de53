use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

use healthinfo_core::archive_health_info;
use serde_json::{json, Value};

fn healthd() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("healthd")?;
    for var in [
        "HEALTHD_CLUSTER_ENDPOINT",
        "HEALTHD_CLUSTER_TOKEN",
        "HEALTHD_SUBNET_API_KEY",
        "HEALTHD_SUBNET_LICENSE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    Ok(cmd)
}

#[test]
fn inspect_decodes_saved_report() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let document = json!({"version": "3", "servers": [{"endpoint": "node1:9000"}]});
    let blob = archive_health_info(&document, "3")?;
    let report = json!({
        "encoded": blob.encoded,
        "serverHealthInfo": document,
        "subnetResponse": "Error: subnet credential resolution failed: no license",
    });
    let path = temp.path().join("report.json");
    fs::write(&path, serde_json::to_string(&report)?)?;

    let output = healthd()?.arg("inspect").arg(&path).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let decoded: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(decoded["version"], "3");
    assert_eq!(decoded["document"], document);
    Ok(())
}

#[test]
fn inspect_accepts_bare_encoded_archive() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let blob = archive_health_info(&json!({"version": "2"}), "2")?;
    let path = temp.path().join("archive.b64");
    fs::write(&path, format!("{}\n", blob.encoded))?;

    let output = healthd()?.arg("inspect").arg(&path).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let decoded: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(decoded["version"], "2");
    Ok(())
}

#[test]
fn inspect_rejects_garbage() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let path = temp.path().join("garbage.txt");
    fs::write(&path, "not an archive")?;
    healthd()?.arg("inspect").arg(&path).assert().failure();
    Ok(())
}

#[test]
fn collect_requires_cluster_endpoint() -> Result<(), Box<dyn std::error::Error>> {
    let output = healthd()?.args(["collect", "--deadline", "1m"]).output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--cluster-endpoint"), "{stderr}");
    Ok(())
}

#[test]
fn collect_rejects_malformed_deadline() -> Result<(), Box<dyn std::error::Error>> {
    healthd()?
        .args(["--cluster-endpoint", "http://127.0.0.1:9", "collect", "--deadline", "soon"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn collect_rejects_zero_deadline_like_sessions_do() -> Result<(), Box<dyn std::error::Error>> {
    let output = healthd()?
        .args(["--cluster-endpoint", "http://127.0.0.1:9", "collect", "--deadline", "0s"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--deadline"), "{stderr}");
    Ok(())
}
