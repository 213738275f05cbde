//! End-to-end tests for the `skein` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn skein(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("skein").unwrap();
    cmd.env("SKEIN_CONFIG", config_dir.path().join("config.toml"))
        .env_remove("SKEIN_URL");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    skein(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("resources"));
}

#[test]
fn test_unsupported_scheme_fails() {
    let dir = tempfile::tempdir().unwrap();
    skein(&dir)
        .args(["tools", "--url", "ftp://example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported URL scheme"));
}

#[test]
fn test_unreachable_server_fails() {
    let dir = tempfile::tempdir().unwrap();
    skein(&dir)
        .args(["ping", "--url", "http://127.0.0.1:9/mcp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[cfg(unix)]
mod over_process {
    use super::*;

    const FAKE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_server.sh");

    fn fake(dir: &TempDir) -> Command {
        let mut cmd = skein(dir);
        cmd.args(["--command", "sh", "--arg", FAKE]);
        cmd
    }

    #[test]
    fn test_tools_table() {
        let dir = tempfile::tempdir().unwrap();
        fake(&dir)
            .arg("tools")
            .assert()
            .success()
            .stdout(predicate::str::contains("echo"))
            .stdout(predicate::str::contains("Echo back the provided message"));
    }

    #[test]
    fn test_tools_json() {
        let dir = tempfile::tempdir().unwrap();
        let output = fake(&dir).args(["tools", "--json"]).output().unwrap();
        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["tools"][0]["name"], "echo");
    }

    #[test]
    fn test_call_prints_text() {
        let dir = tempfile::tempdir().unwrap();
        fake(&dir)
            .args(["call", "echo", "-p", "message=hi"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Echo: hi"));
    }

    #[test]
    fn test_tool_error_sets_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fake(&dir)
            .args(["call", "fail"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("it broke"))
            .stderr(predicate::str::contains("reported an error"));
    }

    #[test]
    fn test_server_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        fake(&dir)
            .arg("resources")
            .assert()
            .failure()
            .stderr(predicate::str::contains("-32601"));
    }

    #[test]
    fn test_info_without_server_info() {
        let dir = tempfile::tempdir().unwrap();
        fake(&dir)
            .args(["info"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fake"))
            .stdout(predicate::str::contains("2024-11-05"));
    }
}
