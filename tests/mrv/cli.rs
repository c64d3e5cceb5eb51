#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use csv::ReaderBuilder;
use serde_json::Value;
use tempfile::TempDir;

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn formula_emits_full_csv_sweep() {
    let output = cargo_bin_cmd!("mrv")
        .arg("formula")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let mut reader = ReaderBuilder::new().from_reader(output.as_slice());
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["records", "clients", "ar"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
    assert_eq!(rows.len(), 6 * 127);
    assert_eq!(&rows[0][0], "1");
    assert_eq!(&rows[0][1], "2");
    assert_eq!(rows[0][2].parse::<f64>().expect("ar"), 0.5);
}

#[test]
fn adjust_emits_one_json_row_per_second() {
    let output = cargo_bin_cmd!("mrv")
        .args([
            "--format", "json", "adjust", "--policy", "binary", "--duration", "5",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = json_lines(&output);
    assert_eq!(rows.len(), 5);
    let records: Vec<u64> = rows.iter().map(|r| r["records"].as_u64().unwrap()).collect();
    assert_eq!(records, vec![1, 2, 3, 4, 5]);
    assert!(rows.iter().all(|r| r["policy"] == "binary"));
    assert_eq!(rows[4]["t"], 4);
}

#[test]
fn adjust_rejects_unknown_policy() {
    cargo_bin_cmd!("mrv")
        .args(["adjust", "--policy", "cubic"])
        .assert()
        .failure();
}

#[test]
fn provision_finds_records_for_target() {
    let output = cargo_bin_cmd!("mrv")
        .args(["--format", "json", "provision", "--target", "0.1", "--tx-s", "500"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = json_lines(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["tx_s"], 500);
    let records = rows[0]["records"].as_u64().expect("records found");
    assert!(records > 1 && records <= 300, "records {records}");
}

#[test]
fn overlap_single_record_aborts_heavily() {
    let output = cargo_bin_cmd!("mrv")
        .args(["--format", "json", "overlap", "--records", "1", "--runs", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = json_lines(&output);
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["ar"].as_f64().unwrap() > 0.9);
}

#[test]
fn workload_reports_fragment_samples() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("mrv.toml");
    fs::write(
        &config,
        "[store]\nmax_nodes = 16\n\n[controller]\ntick_ms = 100\n\n[monitor]\ninterval_ms = 100\n",
    )
    .expect("write config");
    let output = cargo_bin_cmd!("mrv")
        .args([
            "--format", "json", "workload", "--keys", "2", "--threads", "2", "--seconds", "1",
        ])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = json_lines(&output);
    assert!(!rows.is_empty());
    for row in &rows {
        let key = row["key"].as_str().expect("key");
        assert!(key == "0" || key == "1", "key {key}");
        let fragments = row["fragments"].as_u64().expect("fragments");
        assert!((1..=16).contains(&fragments));
    }
}

#[test]
fn workload_rejects_zero_threads() {
    cargo_bin_cmd!("mrv")
        .args(["workload", "--threads", "0", "--seconds", "0"])
        .env("MRV_CONFIG", "/nonexistent/mrv.toml")
        .assert()
        .failure();
}
