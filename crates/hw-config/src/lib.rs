//! Hostwatch configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for events.json
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation

pub mod events;
pub mod resolve;
pub mod validate;

pub use events::{EventsConfig, ScheduledQuery};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use validate::{validate_events, ValidationError, ValidationResult};
