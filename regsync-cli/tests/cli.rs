//! End-to-end tests of the regsync binary

use predicates::prelude::*;
use std::io::Write;

fn regsync() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("regsync");
    cmd.env("REGSYNC_LOG_LEVEL", "warn")
        .env_remove("REGSYNC_REGISTER_TYPE")
        .env_remove("REGSYNC_SERVER_LISTS");
    cmd
}

#[test]
fn check_prints_resolved_config() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "registerType = \"etcd\"\nserverLists = \"http://127.0.0.1:2379\"\n\n[props]\nrootPath = \"/soul/register\"\nzookeeperSessionTimeout = 5000"
    )
    .unwrap();

    regsync()
        .arg("--no-color")
        .arg("check")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("register type:      etcd"))
        .stdout(predicate::str::contains("/soul/register"))
        .stdout(predicate::str::contains("5s"));
}

#[test]
fn check_rejects_unknown_register_type() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{"registerType":"nacos"}}"#).unwrap();

    regsync()
        .arg("check")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nacos"));
}

#[test]
fn env_file_configures_logging() {
    let mut env_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(env_file, "REGSYNC_LOG_LEVEL=info\nREGSYNC_LOG_FORMAT=json").unwrap();

    regsync()
        .env_remove("REGSYNC_LOG_LEVEL")
        .env_remove("REGSYNC_LOG_FORMAT")
        .env_remove("RUST_LOG")
        .arg("--env-file")
        .arg(env_file.path())
        .args([
            "register",
            "--record",
            r#"{"rpcType":"http","contextPath":"/order","ruleName":"/list"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""level":"INFO""#))
        .stdout(predicate::str::contains("client register success"));
}

#[test]
fn missing_env_file_is_an_error() {
    regsync()
        .args(["--env-file", "/nonexistent/regsync.env", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn register_rejects_bad_record() {
    regsync()
        .args(["register", "--record", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("record is not valid JSON"));
}

#[test]
fn register_into_memory_backend() {
    regsync()
        .args([
            "register",
            "--record",
            r#"{"rpcType":"http","contextPath":"/order","ruleName":"/list"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered http order-list"));
}
