//! Event identity and time types.
//!
//! An event is identified within its subscriber by an [`EventId`], a counter
//! that only ever grows. The persisted form is a 10-digit zero-padded decimal
//! so that lexicographic key order and numeric order agree.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Seconds since the Unix epoch.
pub type EventTime = u64;

/// Width of the persisted event id text form.
pub const EVENT_ID_WIDTH: usize = 10;

/// Current wall-clock time in whole seconds.
pub fn now_unix() -> EventTime {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Per-subscriber event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventId(pub u64);

impl EventId {
    /// The id before the first issued id. Never assigned to an event.
    pub const ZERO: EventId = EventId(0);

    /// Numeric value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Largest id whose text form still fits [`EVENT_ID_WIDTH`] digits.
    pub const MAX: EventId = EventId(9_999_999_999);

    /// The id that follows this one, or `None` once [`EventId::MAX`] is reached.
    pub fn next(self) -> Option<EventId> {
        self.0
            .checked_add(1)
            .map(EventId)
            .filter(|id| *id <= EventId::MAX)
    }

    /// Fixed-width text form used in keys and rows.
    pub fn to_key(self) -> String {
        format!("{:0width$}", self.0, width = EVENT_ID_WIDTH)
    }

    /// Parse the text form. Leading zeros are optional.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse::<u64>().ok().map(EventId)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = EVENT_ID_WIDTH)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        EventId(value)
    }
}

impl FromStr for EventId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventId::parse(s).ok_or_else(|| format!("invalid event id: {}", s))
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_key())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventId::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid event id: {}", s)))
    }
}
