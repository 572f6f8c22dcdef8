//! Configuration resolution and loading against real files.
//!
//! Covers:
//! - Resolution order (CLI > env path > env config dir)
//! - Loading + validation of events.json

use hw_config::resolve::{resolve_config, ConfigSource, ENV_CONFIG_DIR, ENV_CONFIG_PATH};
use hw_config::{validate_events, EventsConfig};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::with_capacity(keys.len());
        for key in keys {
            saved.push(env::var(key).ok());
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

fn write_config(path: &Path, json: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config parent");
    }
    fs::write(path, json).expect("write config");
}

#[test]
fn test_resolve_cli_over_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let temp = TempDir::new().expect("temp dir");
        let cli = temp.path().join("cli").join("events.json");
        let from_env = temp.path().join("env").join("events.json");
        write_config(&cli, r#"{"events_max": 1}"#);
        write_config(&from_env, r#"{"events_max": 2}"#);
        env::set_var(ENV_CONFIG_PATH, &from_env);

        let paths = resolve_config(Some(&cli));
        assert_eq!(paths.events_source, ConfigSource::CliArgument);
        assert_eq!(paths.events.as_deref(), Some(cli.as_path()));
    });
}

#[test]
fn test_resolve_env_path_over_config_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let temp = TempDir::new().expect("temp dir");
        let direct = temp.path().join("direct.json");
        let dir = temp.path().join("dir");
        write_config(&direct, "{}");
        write_config(&dir.join("events.json"), "{}");
        env::set_var(ENV_CONFIG_PATH, &direct);
        env::set_var(ENV_CONFIG_DIR, &dir);

        let paths = resolve_config(None);
        assert_eq!(paths.events_source, ConfigSource::Environment);
        assert_eq!(paths.events.as_deref(), Some(direct.as_path()));
    });
}

#[test]
fn test_resolve_config_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let temp = TempDir::new().expect("temp dir");
        write_config(&temp.path().join("events.json"), "{}");
        env::remove_var(ENV_CONFIG_PATH);
        env::set_var(ENV_CONFIG_DIR, temp.path());

        let paths = resolve_config(None);
        assert_eq!(paths.events_source, ConfigSource::Environment);
        assert_eq!(paths.events, Some(temp.path().join("events.json")));
    });
}

#[test]
fn test_load_and_validate_file() {
    let temp = TempDir::new().expect("temp dir");
    let path = temp.path().join("events.json");
    write_config(
        &path,
        r#"{
            "events_max": 1000,
            "events_expiry": 60,
            "events_optimize": false,
            "disable_subscribers": ["syslog_events"],
            "schedule": [{"name": "file_changes", "interval": 30, "tables": ["file_events"]}]
        }"#,
    );

    let config = EventsConfig::load_or_default(Some(&path)).expect("load config");
    validate_events(&config).expect("config should validate");
    assert_eq!(config.events_max, 1000);
    assert!(!config.events_optimize);
    assert!(!config.subscriber_enabled("syslog_events", false));
    assert_eq!(config.schedule[0].tables, vec!["file_events"]);
}

#[test]
fn test_load_missing_file_is_io_error() {
    let err = EventsConfig::from_file(Path::new("/nonexistent/events.json")).unwrap_err();
    assert_eq!(err.code(), 60);
}
