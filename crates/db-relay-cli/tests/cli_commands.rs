// crates/db-relay-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests for the db-relay binary.
// Purpose: Ensure diagnostics report clearly and bad configs fail before dial.
// Dependencies: db-relay binary, rusqlite, tempfile
// ============================================================================
//! ## Overview
//! Runs the compiled binary with a cleared environment inside a scratch
//! directory so neither the host env nor a stray `db-relay.toml` leaks in.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn db_relay_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_db-relay"))
}

fn run_in(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    Command::new(db_relay_bin())
        .env_clear()
        .envs(env.iter().copied())
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run db-relay")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn seeded_db(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("taiko.db3");
    let connection = Connection::open(&path).expect("create db");
    connection
        .execute_batch(
            "CREATE TABLE UserData (Baid INTEGER PRIMARY KEY, MyDonName TEXT);
             INSERT INTO UserData (Baid, MyDonName) VALUES (1, 'don');
             INSERT INTO UserData (Baid, MyDonName) VALUES (2, 'katsu');
             INSERT INTO UserData (Baid, MyDonName) VALUES (3, 'wada');",
        )
        .expect("seed db");
    path
}

const VALID_CONFIG: &str = r#"
[controller]
url = "wss://controller.example/agent"
token = "secret"
agent_id = "agent-1"

[source]
mode = "direct"
db_path = "taiko.db3"
"#;

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Verifies `config validate` accepts the default config file in the cwd.
#[test]
fn config_validate_reports_ok_for_default_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("db-relay.toml"), VALID_CONFIG).expect("write config");

    let output = run_in(dir.path(), &["config", "validate"], &[]);

    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("config ok: direct backend"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("wss://controller.example/agent"), "unexpected stdout: {stdout}");
}

/// Verifies `config validate` names the first failing rule.
#[test]
fn config_validate_rejects_non_websocket_controller() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("relay.toml");
    fs::write(&path, VALID_CONFIG.replace("wss://", "https://")).expect("write config");

    let output = run_in(dir.path(), &["config", "validate", "--config", path.to_string_lossy().as_ref()], &[]);

    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("controller.url must use ws or wss"), "unexpected stderr: {stderr}");
}

/// Verifies environment variables fill in a config with no file at all.
#[test]
fn config_validate_accepts_env_only_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_in(
        dir.path(),
        &["config", "validate"],
        &[
            ("DB_RELAY_CONTROLLER", "ws://127.0.0.1:9/agent"),
            ("DB_RELAY_TOKEN", "secret"),
            ("DB_RELAY_AGENT_ID", "agent-1"),
            ("DB_RELAY_SOURCE", "api"),
            ("DB_RELAY_API_BASE_URL", "https://api.example"),
        ],
    );

    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("config ok: api backend"));
}

/// Verifies `db check` opens the file and counts `UserData` rows.
#[test]
fn db_check_reports_user_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = seeded_db(&dir);

    let output = run_in(dir.path(), &["db", "check", "--db", db.to_string_lossy().as_ref()], &[]);

    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("db ok:"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("(3 UserData rows)"), "unexpected stdout: {stdout}");
}

/// Verifies `db check` fails for a file that does not exist.
#[test]
fn db_check_fails_for_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.db3");

    let output = run_in(dir.path(), &["db", "check", "--db", missing.to_string_lossy().as_ref()], &[]);

    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("open db:"), "unexpected stderr: {}", stderr_of(&output));
    assert!(!missing.exists());
}

/// Verifies `run` exits before dialing when credentials are missing.
#[test]
fn run_without_credentials_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = run_in(dir.path(), &["run", "--source", "direct", "--db", "taiko.db3"], &[]);

    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("missing controller, token, or agent-id"), "unexpected stderr: {stderr}");
}

/// Verifies `run` rejects an unknown source mode.
#[test]
fn run_rejects_unknown_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("db-relay.toml"), VALID_CONFIG).expect("write config");

    let output = run_in(dir.path(), &["run", "--source", "ftp"], &[]);

    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("invalid --source \"ftp\""), "unexpected stderr: {stderr}");
}

/// Verifies `run` fails when the direct database cannot be opened.
#[test]
fn run_fails_when_database_is_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("db-relay.toml"), VALID_CONFIG).expect("write config");

    let output = run_in(dir.path(), &["run"], &[]);

    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("open db"), "unexpected stderr: {stderr}");
}
