//! Logging setup for the hw-core binary.
//!
//! - stdout is reserved for command payloads (JSON)
//! - stderr receives all log output, human-readable or JSONL
//! - library code only emits `tracing` events; nothing here is required to
//!   use the engine as a library

pub mod config;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events are shown at the configured level.
const LOG_TARGETS: [&str; 4] = ["hw_core", "hw_store", "hw_config", "hw_common"];

/// Filter directives for `level` across the workspace crates.
pub fn default_directives(level: LogLevel) -> String {
    let level = LevelFilter::from(level).to_string().to_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Call once at startup.
///
/// `RUST_LOG` directives, when set, replace the level-derived filter.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            let registry = tracing_subscriber::registry().with(filter);
            let result = if config.timestamps {
                registry.with(fmt_layer).try_init()
            } else {
                registry.with(fmt_layer.without_time()).try_init()
            };
            if let Err(e) = result {
                eprintln!("hw-core: logging already initialized: {}", e);
            }
        }
        LogFormat::Jsonl => {
            if let Err(e) = tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .try_init()
            {
                eprintln!("hw-core: logging already initialized: {}", e);
            }
        }
    }
}

/// Identifier correlating every log line of one invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "hw_core=debug,hw_store=debug,hw_config=debug,hw_common=debug"
        );
        assert!(default_directives(LogLevel::Off).starts_with("hw_core=off"));
    }

    #[test]
    fn test_run_id_shape() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
