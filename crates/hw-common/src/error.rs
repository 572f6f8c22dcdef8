//! Error types for hostwatch.
//!
//! Every error carries:
//! - a stable numeric code for machine parsing
//! - a category for grouping
//! - a recoverability hint
//!
//! Errors serialize to structured JSON for CLI output:
//! ```json
//! {
//!   "code": 21,
//!   "category": "event",
//!   "message": "event id allocation failed for file_events: disk full",
//!   "recoverable": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for hostwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Backing key-value store errors.
    Store,
    /// Event recording and retrieval errors.
    Event,
    /// Publisher/subscriber registration errors.
    Registry,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Event => write!(f, "event"),
            ErrorCategory::Registry => write!(f, "registry"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for hostwatch.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Store errors (20-29)
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),

    // Event errors (30-39)
    #[error("event id allocation failed for {subscriber}: {reason}")]
    AllocationFailed { subscriber: String, reason: String },

    #[error("partial expiry for {subscriber}: {failed} deletions failed")]
    PartialExpiry { subscriber: String, failed: usize },

    #[error("subscriber {subscriber} is not accepting events")]
    NotAccepting { subscriber: String },

    #[error("invalid row: {0}")]
    InvalidRow(String),

    // Registry errors (40-49)
    #[error("subscriber {subscriber} is already initialized")]
    AlreadyInitialized { subscriber: String },

    #[error("invalid subscriber: {0}")]
    InvalidSubscriber(String),

    #[error("duplicate subscriber: {0}")]
    DuplicateSubscriber(String),

    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(String),

    #[error("unknown publisher: {0}")]
    UnknownPublisher(String),

    #[error("duplicate publisher: {0}")]
    DuplicatePublisher(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Store errors
    /// - 30-39: Event errors
    /// - 40-49: Registry errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::StoreUnavailable(_) => 20,
            Error::AllocationFailed { .. } => 30,
            Error::PartialExpiry { .. } => 31,
            Error::NotAccepting { .. } => 32,
            Error::InvalidRow(_) => 33,
            Error::AlreadyInitialized { .. } => 40,
            Error::InvalidSubscriber(_) => 41,
            Error::DuplicateSubscriber(_) => 42,
            Error::UnknownSubscriber(_) => 43,
            Error::UnknownPublisher(_) => 44,
            Error::DuplicatePublisher(_) => 45,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,

            Error::StoreUnavailable(_) => ErrorCategory::Store,

            Error::AllocationFailed { .. }
            | Error::PartialExpiry { .. }
            | Error::NotAccepting { .. }
            | Error::InvalidRow(_) => ErrorCategory::Event,

            Error::AlreadyInitialized { .. }
            | Error::InvalidSubscriber(_)
            | Error::DuplicateSubscriber(_)
            | Error::UnknownSubscriber(_)
            | Error::UnknownPublisher(_)
            | Error::DuplicatePublisher(_) => ErrorCategory::Registry,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether retrying the operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,

            Error::StoreUnavailable(_) => true,

            Error::AllocationFailed { .. } => true,
            Error::PartialExpiry { .. } => true, // next cycle retries
            Error::NotAccepting { .. } => false,
            Error::InvalidRow(_) => false,

            Error::AlreadyInitialized { .. }
            | Error::InvalidSubscriber(_)
            | Error::DuplicateSubscriber(_)
            | Error::UnknownSubscriber(_)
            | Error::UnknownPublisher(_)
            | Error::DuplicatePublisher(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::StoreUnavailable(_) => "Store Unavailable",
            Error::AllocationFailed { .. } => "Event Not Recorded",
            Error::PartialExpiry { .. } => "Partial Expiry",
            Error::NotAccepting { .. } => "Subscriber Stopped",
            Error::InvalidRow(_) => "Invalid Row",
            Error::AlreadyInitialized { .. } => "Subscriber Already Initialized",
            Error::InvalidSubscriber(_) => "Invalid Subscriber",
            Error::DuplicateSubscriber(_) => "Duplicate Subscriber",
            Error::UnknownSubscriber(_) => "Unknown Subscriber",
            Error::UnknownPublisher(_) => "Unknown Publisher",
            Error::DuplicatePublisher(_) => "Duplicate Publisher",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl StructuredError {
    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"message":"serialization_failed"}}"#, self.code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::StoreUnavailable("down".into()).code(), 20);
        assert_eq!(
            Error::AllocationFailed {
                subscriber: "file_events".into(),
                reason: "full".into()
            }
            .code(),
            30
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::Config("test".into()).category(), ErrorCategory::Config);
        assert_eq!(
            Error::StoreUnavailable("disk".into()).category(),
            ErrorCategory::Store
        );
        assert_eq!(
            Error::PartialExpiry {
                subscriber: "x".into(),
                failed: 2
            }
            .category(),
            ErrorCategory::Event
        );
        assert_eq!(
            Error::UnknownPublisher("inotify".into()).category(),
            ErrorCategory::Registry
        );
    }

    #[test]
    fn test_error_recoverable() {
        assert!(Error::StoreUnavailable("down".into()).is_recoverable());
        assert!(!Error::NotAccepting {
            subscriber: "file_events".into()
        }
        .is_recoverable());
        assert!(!Error::DuplicateSubscriber("a_events".into()).is_recoverable());
    }

    #[test]
    fn test_structured_error_json() {
        let err = Error::NotAccepting {
            subscriber: "syslog_events".into(),
        };
        let json = StructuredError::from(&err).to_json();
        assert!(json.contains(r#""code":32"#));
        assert!(json.contains(r#""category":"event""#));
        assert!(json.contains(r#""recoverable":false"#));
    }
}
