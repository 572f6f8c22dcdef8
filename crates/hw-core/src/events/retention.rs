//! Retention policy enforcement for buffered events.
//!
//! Two bounds apply to each subscriber:
//! - age: events older than the effective expiry are dropped, whole buckets
//!   at a time where possible
//! - count: beyond `max_events`, the oldest events by id are dropped
//!
//! A failed delete never aborts the cycle; it is reported and retried on the
//! next one.

use std::collections::BTreeSet;
use std::sync::Arc;

use hw_common::{Error, EventId, EventTime, Result};
use hw_store::Store;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::index::TimeIndex;
use super::records::RecordStore;

/// Adds between count-only retention checks.
pub const EVENTS_CHECKPOINT: u64 = 256;

/// Retention bounds for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum buffered events; 0 disables the bound.
    pub max_events: u64,
    /// Configured age bound in seconds; 0 disables age expiry.
    pub expiry_seconds: u64,
    /// Floor on the age bound so scheduled queries can still read.
    pub min_expiration: u64,
}

impl RetentionPolicy {
    /// Age bound actually applied, or `None` when age expiry is off.
    pub fn effective_expiry(&self) -> Option<u64> {
        (self.expiry_seconds > 0).then(|| self.expiry_seconds.max(self.min_expiration))
    }

    /// Events timed strictly before this are expired at `now`.
    pub fn cutoff(&self, now: EventTime) -> Option<EventTime> {
        self.effective_expiry().map(|expiry| now.saturating_sub(expiry))
    }
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionReason {
    Age,
    Count,
}

/// Outcome of one retention cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    /// Age cutoff used, if age expiry ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<EventTime>,
    pub expired_by_age: usize,
    pub expired_by_count: usize,
    /// Keys whose deletion or rewrite failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

impl ExpiryReport {
    pub fn expired(&self) -> usize {
        self.expired_by_age + self.expired_by_count
    }

    pub fn is_noop(&self) -> bool {
        self.expired() == 0 && self.failed.is_empty()
    }

    fn merge(&mut self, other: ExpiryReport) {
        self.cutoff = self.cutoff.or(other.cutoff);
        self.expired_by_age += other.expired_by_age;
        self.expired_by_count += other.expired_by_count;
        self.failed.extend(other.failed);
    }
}

/// Applies a [`RetentionPolicy`] to one subscriber's namespace.
pub struct RetentionManager {
    subscriber: String,
    index: TimeIndex,
    records: RecordStore,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn Store>, subscriber: impl Into<String>) -> Self {
        let subscriber = subscriber.into();
        Self {
            index: TimeIndex::new(store.clone(), subscriber.clone()),
            records: RecordStore::new(store, subscriber.clone()),
            subscriber,
        }
    }

    /// Run both bounds. The age cutoff is computed once from `now`.
    pub fn expire(&self, policy: &RetentionPolicy, now: EventTime) -> Result<ExpiryReport> {
        let mut report = self.expire_age(policy, now)?;
        report.merge(self.expire_count(policy)?);
        self.log_report(&report);
        Ok(report)
    }

    /// Age bound only.
    pub fn expire_age(&self, policy: &RetentionPolicy, now: EventTime) -> Result<ExpiryReport> {
        let mut report = ExpiryReport::default();
        let Some(cutoff) = policy.cutoff(now) else {
            return Ok(report);
        };
        report.cutoff = Some(cutoff);

        // Rows first; only entries whose rows are gone leave the index.
        let sweep = self.index.entries_before(cutoff)?;
        report.failed.extend(sweep.failed);

        let ids: BTreeSet<EventId> = sweep.removed.iter().map(|r| r.id).collect();
        let deleted = self.delete_records(&ids, &mut report);
        report.expired_by_age = deleted.len();

        let stripped = self.index.remove_ids(&deleted)?;
        report.failed.extend(stripped.failed);

        debug!(
            subscriber = %self.subscriber,
            cutoff,
            expired = report.expired_by_age,
            reason = ?RetentionReason::Age,
            "age retention pass"
        );
        Ok(report)
    }

    /// Count bound only.
    pub fn expire_count(&self, policy: &RetentionPolicy) -> Result<ExpiryReport> {
        let mut report = ExpiryReport::default();
        if policy.max_events == 0 {
            return Ok(report);
        }

        let ids = self.records.ids(0)?;
        let max = usize::try_from(policy.max_events).unwrap_or(usize::MAX);
        if ids.len() <= max {
            return Ok(report);
        }
        let overflow = ids.len() - max;
        warn!(
            subscriber = %self.subscriber,
            buffered = ids.len(),
            max_events = policy.max_events,
            "event buffer over capacity; dropping oldest events"
        );

        let oldest: BTreeSet<EventId> = ids.into_iter().take(overflow).collect();
        let deleted = self.delete_records(&oldest, &mut report);
        report.expired_by_count = deleted.len();

        // Only strip index entries whose rows are gone.
        let sweep = self.index.remove_ids(&deleted)?;
        report.failed.extend(sweep.failed);

        debug!(
            subscriber = %self.subscriber,
            expired = report.expired_by_count,
            reason = ?RetentionReason::Count,
            "count retention pass"
        );
        Ok(report)
    }

    // Delete rows, returning the ids actually removed.
    fn delete_records(
        &self,
        ids: &BTreeSet<EventId>,
        report: &mut ExpiryReport,
    ) -> BTreeSet<EventId> {
        let mut deleted = BTreeSet::new();
        for &id in ids {
            match self.records.delete(id) {
                Ok(()) => {
                    deleted.insert(id);
                }
                Err(e) => {
                    warn!(
                        subscriber = %self.subscriber,
                        eid = %id,
                        error = %e,
                        "failed to delete expired event"
                    );
                    report.failed.push(id.to_key());
                }
            }
        }
        deleted
    }

    fn log_report(&self, report: &ExpiryReport) {
        if !report.failed.is_empty() {
            let err = Error::PartialExpiry {
                subscriber: self.subscriber.clone(),
                failed: report.failed.len(),
            };
            warn!(
                subscriber = %self.subscriber,
                code = err.code(),
                error = %err,
                "retention cycle incomplete"
            );
        } else if report.expired() > 0 {
            info!(
                subscriber = %self.subscriber,
                by_age = report.expired_by_age,
                by_count = report.expired_by_count,
                "expired buffered events"
            );
        }
    }
}
