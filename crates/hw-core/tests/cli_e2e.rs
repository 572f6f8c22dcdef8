//! End-to-end tests for the hw-core binary.

use std::collections::BTreeSet;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new(config: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("events.json"), config).expect("write config");
        Env { dir }
    }

    fn config_path(&self) -> std::path::PathBuf {
        self.dir.path().join("events.json")
    }

    fn data_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    /// A command isolated from the user's configuration and data.
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hw-core").expect("hw-core binary should exist");
        cmd.env_remove("HOSTWATCH_CONFIG")
            .env_remove("HOSTWATCH_CONFIG_DIR")
            .env_remove("HOSTWATCH_DATA")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.dir.path().join("xdg"))
            .env("HW_LOG", "off")
            .arg("--config")
            .arg(self.config_path())
            .arg("--data-dir")
            .arg(self.data_dir());
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("stdout is JSON")
    }
}

fn no_expiry() -> Env {
    Env::new(r#"{"events_expiry": 0}"#)
}

#[test]
fn add_then_select() {
    let env = no_expiry();
    let added = env.json(&[
        "add",
        "file_events",
        "--time",
        "1000",
        "--field",
        "path=/etc/hosts",
        "--field",
        "action=UPDATED",
    ]);
    assert_eq!(added["eid"], "0000000001");
    assert_eq!(added["subscriber"], "file_events");

    env.json(&[
        "add",
        "file_events",
        "--time",
        "2000",
        "--field",
        "path=/etc/passwd",
    ]);

    let rows = env.json(&["select", "file_events", "--start", "0", "--stop", "1500"]);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["path"], "/etc/hosts");
    assert_eq!(rows[0]["action"], "UPDATED");
    assert_eq!(rows[0]["time"], "1000");
    assert_eq!(rows[0]["eid"], "0000000001");

    let all = env.json(&["select", "file_events"]);
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[test]
fn named_query_only_sees_new_events() {
    let env = no_expiry();
    env.json(&["add", "file_events", "--field", "n=1"]);

    let first = env.json(&["select", "file_events", "--query", "watch"]);
    assert_eq!(first.as_array().unwrap().len(), 1);

    let second = env.json(&["select", "file_events", "--query", "watch"]);
    assert!(second.as_array().unwrap().is_empty());
}

#[test]
fn expire_and_stats() {
    let env = Env::new(r#"{"events_expiry": 0, "events_max": 2}"#);
    for t in ["100", "200", "300"] {
        env.json(&["add", "file_events", "--time", t]);
    }

    let stats = env.json(&["stats", "file_events"]);
    assert_eq!(stats["records"], 3);
    assert_eq!(stats["last_eid"], "0000000003");
    assert_eq!(stats["name"], "file_events");

    let report = env.json(&["expire", "file_events"]);
    assert_eq!(report["expired_by_count"], 1);
    assert_eq!(report["expired_by_age"], 0);

    assert_eq!(env.json(&["stats", "file_events"])["records"], 2);
}

#[test]
fn concurrent_adds_get_distinct_ids() {
    let env = no_expiry();
    let children: Vec<_> = (0..16)
        .map(|i| {
            let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("hw-core"));
            cmd.env_remove("HOSTWATCH_CONFIG")
                .env_remove("HOSTWATCH_CONFIG_DIR")
                .env_remove("HOSTWATCH_DATA")
                .env_remove("RUST_LOG")
                .env("HW_LOG", "off")
                .arg("--config")
                .arg(env.config_path())
                .arg("--data-dir")
                .arg(env.data_dir())
                .args(["add", "file_events", "--field"])
                .arg(format!("n={}", i))
                .stdout(std::process::Stdio::piped())
                .spawn()
                .expect("spawn hw-core")
        })
        .collect();

    let mut eids = BTreeSet::new();
    for child in children {
        let output = child.wait_with_output().expect("hw-core exits");
        assert!(output.status.success());
        let added: Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
        eids.insert(added["eid"].as_str().unwrap().to_string());
    }
    assert_eq!(eids.len(), 16);

    let rows = env.json(&["select", "file_events"]);
    assert_eq!(rows.as_array().unwrap().len(), 16);
    assert_eq!(env.json(&["stats", "file_events"])["last_eid"], "0000000016");
}

#[test]
fn config_reports_source() {
    let env = no_expiry();
    let shown = env.json(&["config"]);
    assert_eq!(shown["source"], "CLI argument");
    assert_eq!(shown["config"]["events_expiry"], 0);
    assert_eq!(shown["config"]["events_max"], 50_000);
    assert_eq!(
        Path::new(shown["data_dir"].as_str().unwrap()),
        env.data_dir().as_path()
    );
}

#[test]
fn missing_config_file_is_a_config_error() {
    let env = no_expiry();
    Command::cargo_bin("hw-core")
        .unwrap()
        .env("HW_LOG", "off")
        .args(["--config"])
        .arg(env.dir.path().join("absent.json"))
        .arg("config")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("\"code\":10"));
}

#[test]
fn invalid_config_is_a_config_error() {
    let env = Env::new(r#"{"enable_subscribers": ["files"]}"#);
    env.cmd()
        .arg("config")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("\"category\":\"config\""));
}

#[test]
fn disabled_subscriber_rejects_adds() {
    let env = Env::new(r#"{"disable_subscribers": ["file_events"]}"#);
    env.cmd()
        .args(["add", "file_events"])
        .assert()
        .code(20)
        .stderr(predicate::str::contains("\"code\":32"));
}

#[test]
fn invalid_subscriber_name_is_a_usage_error() {
    let env = no_expiry();
    env.cmd()
        .args(["add", "files"])
        .assert()
        .code(30)
        .stderr(predicate::str::contains("\"code\":41"));
}

#[test]
fn malformed_field_is_a_usage_error() {
    let env = no_expiry();
    env.cmd()
        .args(["add", "file_events", "--field", "novalue"])
        .assert()
        .code(30)
        .stderr(predicate::str::contains("key=value"));
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("hw-core")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("select").and(predicate::str::contains("expire")),
        );
}
