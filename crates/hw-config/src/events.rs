//! Event engine configuration (events.json).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Default bound on buffered events per subscriber.
pub const DEFAULT_EVENTS_MAX: u64 = 50_000;

/// Default age bound on buffered events, in seconds.
pub const DEFAULT_EVENTS_EXPIRY: u64 = 3_600;

/// Suffix every subscriber (and therefore every event table) name carries.
pub const SUBSCRIBER_SUFFIX: &str = "_events";

/// Event engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum number of events buffered per subscriber; 0 disables the bound.
    pub events_max: u64,

    /// Age after which buffered events expire, in seconds; 0 disables expiry.
    pub events_expiry: u64,

    /// Deliver only new events to repeated named queries.
    pub events_optimize: bool,

    /// Disable every publisher and subscriber.
    pub disable_events: bool,

    /// Subscribers explicitly enabled.
    pub enable_subscribers: Vec<String>,

    /// Subscribers explicitly disabled. Wins over `enable_subscribers`.
    pub disable_subscribers: Vec<String>,

    /// Scheduled queries, used to derive minimum retention.
    pub schedule: Vec<ScheduledQuery>,

    /// Where the durable event store lives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(rename = "_comment", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            events_max: DEFAULT_EVENTS_MAX,
            events_expiry: DEFAULT_EVENTS_EXPIRY,
            events_optimize: true,
            disable_events: false,
            enable_subscribers: Vec::new(),
            disable_subscribers: Vec::new(),
            schedule: Vec::new(),
            database_path: None,
            comment: None,
        }
    }
}

/// A query the external scheduler runs periodically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledQuery {
    /// Unique query name; also the optimization checkpoint name.
    pub name: String,

    /// Seconds between executions.
    pub interval: u64,

    /// Event tables the query reads.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl EventsConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a JSON string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Load from `path` if present, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ValidationError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Whether the named subscriber should run.
    ///
    /// `default_disabled` is the subscriber's own default. Explicit enabling
    /// is applied first, then explicit disabling as the final override.
    pub fn subscriber_enabled(&self, name: &str, default_disabled: bool) -> bool {
        let mut disabled = default_disabled;
        if self.enable_subscribers.iter().any(|s| s == name) {
            disabled = false;
        }
        if self.disable_subscribers.iter().any(|s| s == name) {
            disabled = true;
        }
        !disabled
    }

    /// Scheduled queries reading the given event table.
    pub fn queries_reading<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ScheduledQuery> {
        self.schedule
            .iter()
            .filter(move |q| q.tables.iter().any(|t| t == table))
    }
}
