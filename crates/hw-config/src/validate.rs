//! Configuration validation errors and semantic validation.

use std::collections::HashSet;

use thiserror::Error;
use tracing::warn;

use crate::events::{EventsConfig, SUBSCRIBER_SUFFIX};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
        }
    }
}

impl From<ValidationError> for hw_common::Error {
    fn from(err: ValidationError) -> Self {
        hw_common::Error::Config(err.to_string())
    }
}

/// Validate events configuration semantically.
pub fn validate_events(config: &EventsConfig) -> ValidationResult<()> {
    validate_subscriber_lists(config)?;
    validate_schedule(config)?;

    if config.events_expiry > 0 {
        for query in &config.schedule {
            if query.interval.saturating_mul(3) > config.events_expiry
                && !query.tables.is_empty()
            {
                warn!(
                    query = %query.name,
                    interval = query.interval,
                    events_expiry = config.events_expiry,
                    "events_expiry is shorter than three query intervals; retention will be extended"
                );
            }
        }
    }

    Ok(())
}

fn validate_subscriber_lists(config: &EventsConfig) -> ValidationResult<()> {
    for (field, names) in [
        ("enable_subscribers", &config.enable_subscribers),
        ("disable_subscribers", &config.disable_subscribers),
    ] {
        for name in names {
            if !name.ends_with(SUBSCRIBER_SUFFIX) || name.len() == SUBSCRIBER_SUFFIX.len() {
                return Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    message: format!(
                        "subscriber names must end in {}, got {:?}",
                        SUBSCRIBER_SUFFIX, name
                    ),
                });
            }
        }
    }

    if let Some(both) = config
        .enable_subscribers
        .iter()
        .find(|name| config.disable_subscribers.contains(name))
    {
        return Err(ValidationError::SemanticError(format!(
            "subscriber {} is both enabled and disabled",
            both
        )));
    }

    Ok(())
}

fn validate_schedule(config: &EventsConfig) -> ValidationResult<()> {
    let mut seen = HashSet::new();
    for (i, query) in config.schedule.iter().enumerate() {
        if query.name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: format!("schedule[{}].name", i),
                message: "Must not be empty".to_string(),
            });
        }
        if !seen.insert(query.name.as_str()) {
            return Err(ValidationError::SemanticError(format!(
                "duplicate scheduled query name: {}",
                query.name
            )));
        }
        if query.interval == 0 {
            return Err(ValidationError::InvalidValue {
                field: format!("schedule.{}.interval", query.name),
                message: "Must be positive".to_string(),
            });
        }
    }
    Ok(())
}
