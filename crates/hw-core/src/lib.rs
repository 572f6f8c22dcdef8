//! Hostwatch Core Library
//!
//! This library provides the event engine and its ambient plumbing:
//! - Event recording and time-indexed retrieval (`events`)
//! - Exit codes for CLI operations
//! - Logging setup
//!
//! The binary entry point is in `main.rs`.

pub mod events;
pub mod exit_codes;
pub mod logging;
