use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Cache the built binary path to avoid rebuilding for each test.
static MPROWS_BIN: OnceLock<PathBuf> = OnceLock::new();

/// Helper function to get the mprows binary command.
/// Uses escargot to build and locate the binary in the workspace (once).
fn mprows_cmd() -> Command {
    let bin_path = MPROWS_BIN.get_or_init(|| {
        let bin = escargot::CargoBuild::new()
            .bin("mprows")
            .current_release()
            .current_target()
            .manifest_path("../mprows-cli/Cargo.toml")
            .run()
            .expect("Failed to build mprows binary");

        bin.path().to_path_buf()
    });

    Command::new(bin_path)
}

fn write_sample_csv(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("people.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "id,name,age").unwrap();
    for i in 1..=20 {
        writeln!(f, "{i},person {i},{}", 20 + i).unwrap();
    }
    path
}

#[test]
fn cli_metadata_missing_file_fails() {
    let mut cmd = mprows_cmd();
    cmd.arg("metadata").arg("no/such/file.mpr");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Stopping with error"));
}

#[test]
fn cli_load_then_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_sample_csv(dir.path());
    let mpr_path = dir.path().join("people.mpr");

    mprows_cmd()
        .arg("load")
        .arg(&csv_path)
        .arg("--output")
        .arg(&mpr_path)
        .arg("--no-progress")
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded"));

    assert!(mpr_path.exists());

    mprows_cmd()
        .arg("metadata")
        .arg(&mpr_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("rows").and(predicate::str::contains("21")));
}

#[test]
fn cli_metadata_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_sample_csv(dir.path());
    let mpr_path = dir.path().join("people.mpr");

    mprows_cmd()
        .arg("load")
        .arg(&csv_path)
        .arg("--output")
        .arg(&mpr_path)
        .arg("--no-progress")
        .assert()
        .success();

    let output = mprows_cmd()
        .arg("metadata")
        .arg(&mpr_path)
        .arg("--as-json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["info"]["rows"], 21);
    assert_eq!(doc["meta"]["process"]["finalized"], true);
    let headers = doc["info"]["headers"].as_array().unwrap();
    assert_eq!(headers[0], "id");
}

#[test]
fn cli_preview_prints_data_rows() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_sample_csv(dir.path());
    let mpr_path = dir.path().join("people.mpr");

    mprows_cmd()
        .arg("load")
        .arg(&csv_path)
        .arg("--output")
        .arg(&mpr_path)
        .arg("--no-progress")
        .assert()
        .success();

    mprows_cmd()
        .arg("preview")
        .arg(&mpr_path)
        .arg("--rows")
        .arg("3")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("id,name,age")
                .and(predicate::str::contains("person 1"))
                .and(predicate::str::contains("person 3")),
        );
}
