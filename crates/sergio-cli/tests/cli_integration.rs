//! CLI subprocess integration tests.
//!
//! These tests invoke the `sergio` binary as a subprocess with the mock
//! runtime selected, and verify exit codes and log output routing.

use std::path::{Path, PathBuf};
use std::process::Command;

fn sergio_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sergio"));
    // The mock runtime needs no lxc installation and no settle delay.
    cmd.env("SERGIO_RUNTIME", "mock");
    cmd.env("SERGIO_QUIESCENCE", "0");
    cmd
}

fn write_workspace(dir: &Path, defs: &[(&str, &str)]) -> PathBuf {
    let definitions = dir.join("containers");
    let backups = dir.join("backups");
    std::fs::create_dir_all(&definitions).unwrap();
    std::fs::create_dir_all(&backups).unwrap();
    for (id, yaml) in defs {
        std::fs::write(definitions.join(format!("{id}.yaml")), yaml).unwrap();
    }
    let config = dir.join("sergio.yml");
    std::fs::write(&config, "definitions: containers\nbackups: backups\n").unwrap();
    config
}

#[test]
fn cli_version_exits_zero() {
    let output = sergio_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "sergio --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("sergio"),
        "version output must contain 'sergio': {stdout}"
    );
}

#[test]
fn cli_help_lists_positionals() {
    let output = sergio_bin().arg("--help").output().unwrap();
    assert!(output.status.success(), "sergio --help must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CONTAINER"), "help must show CONTAINER: {stdout}");
    assert!(stdout.contains("VERB"), "help must show VERB: {stdout}");
}

#[test]
fn cli_missing_config_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let output = sergio_bin()
        .current_dir(dir.path())
        .env_remove("HOME")
        .args(["db", "running"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
}

#[test]
fn cli_explicit_config_flag_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(
        dir.path(),
        &[("db", "container:\n  name: db\n  description: d\n  box: img\n")],
    );

    let output = sergio_bin()
        .args(["db", "running", "-c", &config.to_string_lossy()])
        .output()
        .unwrap();
    // defined but never created: not running, exit 1
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not running"), "stdout: {stdout}");
}

#[test]
fn cli_create_logs_lifecycle_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(
        dir.path(),
        &[("db", "container:\n  name: db\n  description: d\n  box: images:debian/12\n")],
    );

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["db", "create", "-o", "log"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "create must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("[db] Create new container db from images:debian/12"),
        "stdout: {stdout}"
    );
    assert!(stdout.contains("[db] Done"), "stdout: {stdout}");
}

#[test]
fn cli_output_none_suppresses_log_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(
        dir.path(),
        &[("db", "container:\n  name: db\n  description: d\n  box: img\n")],
    );

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["db", "create", "-o", "none"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty(), "stdout must be silent with -o none");
}

#[test]
fn cli_unknown_verb_dispatches_to_actions() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(
        dir.path(),
        &[(
            "db",
            "container:\n  name: db\n  description: d\n  box: img\n  actions:\n    greet:\n      - echo hi $who\n",
        )],
    );

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["db", "greet", "who=ops", "-o", "log"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Execute action \"greet\""), "stdout: {stdout}");
    assert!(stdout.contains("echo hi ops"), "stdout: {stdout}");
}

#[test]
fn cli_undefined_action_logs_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(
        dir.path(),
        &[("db", "container:\n  name: db\n  description: d\n  box: img\n")],
    );

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["db", "frobnicate", "-o", "log"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Action \"frobnicate\" does not exist"),
        "stdout: {stdout}"
    );
}

#[test]
fn cli_unknown_container_exits_one_with_label() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(dir.path(), &[]);

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["ghost", "start"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ghost]"), "stderr: {stderr}");
    assert!(stderr.contains("no definition found"), "stderr: {stderr}");
}

#[test]
fn cli_download_requires_two_params() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(
        dir.path(),
        &[("db", "container:\n  name: db\n  description: d\n  box: img\n")],
    );

    let output = sergio_bin()
        .current_dir(dir.path())
        .args(["db", "download", "/only-src"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SRC and DST"), "stderr: {stderr}");
}
