//! Hostwatch common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the hostwatch crates:
//! - Event identifiers with a fixed-width, order-preserving text form
//! - Event time helpers
//! - Row (field map) representation for materialized events
//! - The unified error type

pub mod error;
pub mod id;
pub mod row;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::{now_unix, EventId, EventTime, EVENT_ID_WIDTH};
pub use row::{Row, EID_FIELD, TIME_FIELD};
