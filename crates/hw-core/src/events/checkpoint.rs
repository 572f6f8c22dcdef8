//! Per-query consumption checkpoints.
//!
//! A named query reading a subscriber repeatedly resumes from where its last
//! read stopped. The checkpoint is the `(time, eid)` high-water mark of what
//! was delivered; entries at the boundary second with an id at or below the
//! mark were already seen.

use std::sync::Arc;

use hw_common::{EventId, EventTime, Result};
use hw_store::{Store, EVENTS_DOMAIN};
use serde::Serialize;
use tracing::warn;

use super::index::IndexedRecord;
use super::keys;

/// Delivery high-water mark for one `(query, subscriber)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeCheckpoint {
    pub optimize_time: EventTime,
    pub optimize_eid: EventId,
}

impl OptimizeCheckpoint {
    /// Whether this entry was delivered by an earlier read.
    pub fn already_delivered(&self, record: &IndexedRecord) -> bool {
        record.time <= self.optimize_time && record.id <= self.optimize_eid
    }

    /// The checkpoint after delivering up to `now`.
    pub fn advance(self, now: EventTime, delivered_max: Option<EventId>) -> Self {
        Self {
            optimize_time: now,
            optimize_eid: delivered_max.map_or(self.optimize_eid, |id| id.max(self.optimize_eid)),
        }
    }
}

pub struct CheckpointStore {
    store: Arc<dyn Store>,
    subscriber: String,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn Store>, subscriber: impl Into<String>) -> Self {
        Self {
            store,
            subscriber: subscriber.into(),
        }
    }

    /// Load the checkpoint for `query`; zero when none was stored.
    pub fn load(&self, query: &str) -> Result<OptimizeCheckpoint> {
        let time_key = keys::optimize_time(query, &self.subscriber);
        let eid_key = keys::optimize_eid(query, &self.subscriber);

        let optimize_time = self
            .read_text(&time_key)?
            .and_then(|text| self.parse_or_warn(&time_key, text.trim().parse::<u64>().ok()))
            .unwrap_or(0);
        let optimize_eid = self
            .read_text(&eid_key)?
            .and_then(|text| self.parse_or_warn(&eid_key, EventId::parse(text.trim())))
            .unwrap_or(EventId::ZERO);

        Ok(OptimizeCheckpoint {
            optimize_time,
            optimize_eid,
        })
    }

    pub fn store(&self, query: &str, checkpoint: &OptimizeCheckpoint) -> Result<()> {
        self.store.put(
            EVENTS_DOMAIN,
            &keys::optimize_eid(query, &self.subscriber),
            checkpoint.optimize_eid.to_key().as_bytes(),
        )?;
        self.store.put(
            EVENTS_DOMAIN,
            &keys::optimize_time(query, &self.subscriber),
            checkpoint.optimize_time.to_string().as_bytes(),
        )?;
        Ok(())
    }

    fn read_text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(EVENTS_DOMAIN, key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn parse_or_warn<T>(&self, key: &str, parsed: Option<T>) -> Option<T> {
        if parsed.is_none() {
            warn!(
                subscriber = %self.subscriber,
                key = %key,
                "resetting unreadable optimize checkpoint"
            );
        }
        parsed
    }
}
