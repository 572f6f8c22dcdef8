//! Exit codes for the hw-core CLI.
//!
//! Stable contract for automation:
//! - 0: success
//! - 10-19: configuration errors
//! - 20-29: store and engine errors
//! - 30-39: usage errors (bad arguments, unknown subscriber)

use hw_common::{Error, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,

    /// Configuration missing, unreadable or invalid.
    ConfigError = 10,

    /// Backing store unavailable or corrupt, or an event could not be
    /// recorded.
    StoreError = 20,

    /// Invalid arguments or a request naming something that does not exist.
    UsageError = 30,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::StoreError => "ERR_STORE",
            ExitCode::UsageError => "ERR_USAGE",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Store | ErrorCategory::Event | ErrorCategory::Io => ExitCode::StoreError,
            ErrorCategory::Registry => ExitCode::UsageError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
