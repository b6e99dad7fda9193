//! CLI integration tests for graphrag
//!
//! Runs the graphrag binary end-to-end using assert_cmd, with configuration
//! isolated in a temporary directory and no credentials in the environment.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with an isolated config dir and no credentials
#[allow(deprecated)]
fn graphrag_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("graphrag").unwrap();
    cmd.current_dir(config_dir.path())
        .env("GRAPHRAG_CONFIG_DIR", config_dir.path())
        .env_remove("GRAPHRAG_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("NEO4J_URI")
        .env_remove("NEO4J_PASSWORD");
    cmd
}

#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Routed knowledge-graph RAG"));
}

#[test]
fn test_version_output() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["--version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graphrag"));
}

#[test]
fn test_config_path_uses_override_dir() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_set_then_get() {
    let dir = TempDir::new().unwrap();

    graphrag_cmd(&dir)
        .args(["config", "set", "retrieval.top_k", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set retrieval.top_k = 6"));

    assert!(dir.path().join("config.toml").exists());

    graphrag_cmd(&dir)
        .args(["config", "get", "retrieval.top_k"])
        .assert()
        .success()
        .stdout(predicate::str::diff("6\n"));
}

#[test]
fn test_config_rejects_invalid_relationship() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["config", "set", "retrieval.excluded_relationship", "MENTIONS|KNOWS"])
        .assert()
        .failure();
}

#[test]
fn test_config_list_has_defaults() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("retrieval.excluded_relationship = MENTIONS"));
}

#[test]
fn test_malformed_request_body() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["request"])
        .write_stdin("{not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E401"));
}

#[test]
fn test_request_without_api_key() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["ask", "Hello?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E100"));
}

#[test]
fn test_doctor_reports_missing_key() {
    let dir = TempDir::new().unwrap();
    graphrag_cmd(&dir)
        .args(["doctor"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[!!] API Key: Not configured"))
        .stdout(predicate::str::contains("[--] Graph database"));
}
