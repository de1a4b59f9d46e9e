//! CLI Integration Tests
//!
//! Runs the compiled binary to check argument handling and startup failures.

use assert_cmd::Command;
use predicates::prelude::*;

/// The binary with every configuration variable cleared
fn s3nd() -> Command {
    let mut cmd = Command::cargo_bin("s3nd").unwrap();
    for var in [
        "S3DAEMON_CONFIG",
        "S3DAEMON_HOST",
        "S3DAEMON_PORT",
        "S3_ENDPOINT_URL",
        "S3DAEMON_MAX_PARALLEL_UPLOADS",
        "S3DAEMON_UPLOAD_TIMEOUT",
        "S3DAEMON_ADMISSION_TIMEOUT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help() {
    s3nd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--s3-endpoint-url"))
        .stdout(predicate::str::contains("--max-parallel-uploads"));
}

#[test]
fn test_version() {
    s3nd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_endpoint_fails() {
    s3nd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("s3-endpoint-url is required"));
}

#[test]
fn test_invalid_endpoint_fails() {
    s3nd()
        .args(["--s3-endpoint-url", "ftp://localhost:9000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must start with http:// or https://"));
}

#[test]
fn test_invalid_duration_rejected() {
    s3nd()
        .args([
            "--s3-endpoint-url",
            "http://localhost:9000",
            "--upload-timeout",
            "soon",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("upload-timeout"));
}
