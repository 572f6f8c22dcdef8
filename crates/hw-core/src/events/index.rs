//! Multi-resolution time bucket index.
//!
//! Every event is appended to the 60 second bucket containing its time.
//! Closed spans are later folded into coarser buckets by [`TimeIndex::promote`],
//! so a range query touches a handful of coarse buckets instead of every
//! minute of history.
//!
//! Callers serialize mutation through the owning subscriber's lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use hw_common::{EventId, EventTime, Result};
use hw_store::{Store, EVENTS_DOMAIN};
use serde::Serialize;
use tracing::{debug, warn};

use super::keys;

/// Bucket widths in seconds, finest first.
pub const GRANULARITIES: [u64; 3] = [60, 3_600, 86_400];

/// Finer buckets needed inside a closed span before it is promoted.
pub const PROMOTE_MIN_BUCKETS: usize = 8;

/// One `(granularity, index)` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BucketKey {
    pub granularity: u64,
    pub index: u64,
}

impl BucketKey {
    /// The bucket of `granularity` holding `time`.
    pub fn containing(granularity: u64, time: EventTime) -> Self {
        Self {
            granularity,
            index: time / granularity,
        }
    }

    /// Inclusive start of the span.
    pub fn span_start(&self) -> EventTime {
        self.index.saturating_mul(self.granularity)
    }

    /// Exclusive end of the span.
    pub fn span_end(&self) -> EventTime {
        self.span_start().saturating_add(self.granularity)
    }

    /// Whether the span intersects the closed interval `[start, stop]`.
    pub fn overlaps(&self, start: EventTime, stop: EventTime) -> bool {
        self.span_start() <= stop && self.span_end() > start
    }

    fn store_key(&self, subscriber: &str) -> String {
        keys::records(subscriber, self.granularity, self.index)
    }

    // Time order; coarse before fine at equal starts.
    fn sort_key(&self) -> (EventTime, std::cmp::Reverse<u64>) {
        (self.span_start(), std::cmp::Reverse(self.granularity))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.granularity, self.index)
    }
}

/// An `(id, time)` pair as stored in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IndexedRecord {
    pub id: EventId,
    pub time: EventTime,
}

/// Outcome of a sweep over the index: what was removed and which buckets
/// could not be rewritten.
#[derive(Debug, Default)]
pub struct Sweep {
    pub removed: Vec<IndexedRecord>,
    pub failed: Vec<String>,
}

/// Outcome of a promotion pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Coarse buckets written.
    pub promoted: usize,
    /// Finer buckets folded away.
    pub folded: usize,
}

/// Time index for one subscriber.
pub struct TimeIndex {
    store: Arc<dyn Store>,
    subscriber: String,
}

impl TimeIndex {
    pub fn new(store: Arc<dyn Store>, subscriber: impl Into<String>) -> Self {
        Self {
            store,
            subscriber: subscriber.into(),
        }
    }

    /// Append an entry to the finest bucket containing `time`.
    pub fn insert(&self, id: EventId, time: EventTime) -> Result<()> {
        let bucket = BucketKey::containing(GRANULARITIES[0], time);
        let key = bucket.store_key(&self.subscriber);
        let entry = format!("{}:{}", id.to_key(), time);

        let value = match self.store.get(EVENTS_DOMAIN, &key)? {
            Some(existing) if !existing.is_empty() => {
                let mut value = existing;
                value.push(b',');
                value.extend_from_slice(entry.as_bytes());
                value
            }
            _ => entry.into_bytes(),
        };
        self.store.put(EVENTS_DOMAIN, &key, &value)?;
        Ok(())
    }

    /// Every existing bucket, in time order.
    pub fn buckets(&self) -> Result<Vec<BucketKey>> {
        let prefix = keys::records_prefix(&self.subscriber);
        let mut buckets: Vec<BucketKey> = self
            .store
            .scan_keys(EVENTS_DOMAIN, &prefix, 0)?
            .iter()
            .filter_map(|key| {
                let parsed = parse_bucket(&key[prefix.len()..]);
                if parsed.is_none() {
                    warn!(
                        subscriber = %self.subscriber,
                        key = %key,
                        "skipping malformed index key"
                    );
                }
                parsed
            })
            .collect();
        buckets.sort_by_key(BucketKey::sort_key);
        Ok(buckets)
    }

    /// Buckets that may hold events timed within `[start, stop]`.
    ///
    /// `stop == 0` leaves the range open-ended. The result is a covering
    /// superset; callers filter by exact time.
    pub fn plan(&self, start: EventTime, stop: EventTime) -> Result<Vec<BucketKey>> {
        let stop = if stop == 0 { EventTime::MAX } else { stop };
        if start > stop {
            return Ok(Vec::new());
        }
        let plan: Vec<BucketKey> = self
            .buckets()?
            .into_iter()
            .filter(|bucket| bucket.overlaps(start, stop))
            .collect();
        debug!(
            subscriber = %self.subscriber,
            start,
            stop,
            buckets = plan.len(),
            "planned index read"
        );
        Ok(plan)
    }

    /// Entries of the given buckets, deduplicated and ordered by id.
    pub fn records(&self, buckets: &[BucketKey]) -> Result<Vec<IndexedRecord>> {
        let mut merged = BTreeMap::new();
        for bucket in buckets {
            for record in self.read_bucket(bucket)? {
                merged.entry(record.id).or_insert(record.time);
            }
        }
        Ok(merged
            .into_iter()
            .map(|(id, time)| IndexedRecord { id, time })
            .collect())
    }

    /// Entries of one bucket in stored order. A missing bucket is empty.
    pub fn read_bucket(&self, bucket: &BucketKey) -> Result<Vec<IndexedRecord>> {
        let key = bucket.store_key(&self.subscriber);
        let Some(bytes) = self.store.get(EVENTS_DOMAIN, &key)? else {
            return Ok(Vec::new());
        };
        Ok(self.decode(&key, &bytes))
    }

    /// Replace a bucket's entries; an empty list deletes the bucket.
    pub fn write_bucket(&self, bucket: &BucketKey, records: &[IndexedRecord]) -> Result<()> {
        let key = bucket.store_key(&self.subscriber);
        if records.is_empty() {
            self.store.delete(EVENTS_DOMAIN, &key)?;
        } else {
            self.store.put(EVENTS_DOMAIN, &key, encode(records).as_bytes())?;
        }
        Ok(())
    }

    /// Fold closed spans of finer buckets into coarser ones.
    ///
    /// A span of granularity `G` ending at or before `now` is promoted when it
    /// holds at least [`PROMOTE_MIN_BUCKETS`] finer buckets, or when a `G`
    /// bucket already exists there. The coarse bucket is written before the
    /// finer ones are deleted.
    pub fn promote(&self, now: EventTime) -> Result<PromotionReport> {
        let mut report = PromotionReport::default();

        for &coarse in &GRANULARITIES[1..] {
            let buckets = self.buckets()?;
            let existing: BTreeSet<u64> = buckets
                .iter()
                .filter(|b| b.granularity == coarse)
                .map(|b| b.index)
                .collect();

            let mut spans: BTreeMap<u64, Vec<BucketKey>> = BTreeMap::new();
            for bucket in buckets.iter().filter(|b| b.granularity < coarse) {
                spans
                    .entry(bucket.span_start() / coarse)
                    .or_default()
                    .push(*bucket);
            }

            for (index, finer) in spans {
                let target = BucketKey {
                    granularity: coarse,
                    index,
                };
                if target.span_end() > now {
                    continue;
                }
                if finer.len() < PROMOTE_MIN_BUCKETS && !existing.contains(&index) {
                    continue;
                }

                let mut sources = finer.clone();
                sources.push(target);
                let merged = self.records(&sources)?;
                self.write_bucket(&target, &merged)?;
                for bucket in &finer {
                    self.store
                        .delete(EVENTS_DOMAIN, &bucket.store_key(&self.subscriber))?;
                }

                debug!(
                    subscriber = %self.subscriber,
                    bucket = %target,
                    folded = finer.len(),
                    entries = merged.len(),
                    "promoted index span"
                );
                report.promoted += 1;
                report.folded += finer.len();
            }
        }

        Ok(report)
    }

    /// Entries timed strictly before `cutoff`, ordered by id.
    ///
    /// Only buckets starting before the cutoff are read. A bucket that cannot
    /// be read is reported in `failed` and skipped.
    pub fn entries_before(&self, cutoff: EventTime) -> Result<Sweep> {
        let mut sweep = Sweep::default();
        let mut merged = BTreeMap::new();
        for bucket in self.buckets()? {
            if bucket.span_start() >= cutoff {
                continue;
            }
            match self.read_bucket(&bucket) {
                Ok(entries) => {
                    for record in entries.into_iter().filter(|r| r.time < cutoff) {
                        merged.entry(record.id).or_insert(record.time);
                    }
                }
                Err(e) => {
                    warn!(
                        subscriber = %self.subscriber,
                        bucket = %bucket,
                        error = %e,
                        "failed to read bucket during expiry"
                    );
                    sweep.failed.push(bucket.store_key(&self.subscriber));
                }
            }
        }
        sweep.removed = merged
            .into_iter()
            .map(|(id, time)| IndexedRecord { id, time })
            .collect();
        Ok(sweep)
    }

    /// Strip the given ids from every bucket.
    pub fn remove_ids(&self, ids: &BTreeSet<EventId>) -> Result<Sweep> {
        let mut sweep = Sweep::default();
        if ids.is_empty() {
            return Ok(sweep);
        }
        for bucket in self.buckets()? {
            let key = bucket.store_key(&self.subscriber);
            let entries = match self.read_bucket(&bucket) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        subscriber = %self.subscriber,
                        bucket = %bucket,
                        error = %e,
                        "failed to read bucket during expiry"
                    );
                    sweep.failed.push(key);
                    continue;
                }
            };
            let (removed, kept): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|r| ids.contains(&r.id));
            if removed.is_empty() {
                continue;
            }
            match self.write_bucket(&bucket, &kept) {
                Ok(()) => sweep.removed.extend(removed),
                Err(e) => {
                    warn!(
                        subscriber = %self.subscriber,
                        bucket = %bucket,
                        error = %e,
                        "failed to rewrite bucket during expiry"
                    );
                    sweep.failed.push(key);
                }
            }
        }
        Ok(sweep)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Vec<IndexedRecord> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            warn!(subscriber = %self.subscriber, key = %key, "index bucket is not UTF-8");
            return Vec::new();
        };
        text.split(',')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let parsed = parse_entry(pair);
                if parsed.is_none() {
                    warn!(
                        subscriber = %self.subscriber,
                        key = %key,
                        entry = %pair,
                        "skipping malformed index entry"
                    );
                }
                parsed
            })
            .collect()
    }
}

fn parse_entry(pair: &str) -> Option<IndexedRecord> {
    let (id, time) = pair.split_once(':')?;
    Some(IndexedRecord {
        id: EventId::parse(id)?,
        time: time.parse().ok()?,
    })
}

fn parse_bucket(suffix: &str) -> Option<BucketKey> {
    let (granularity, index) = suffix.split_once('.')?;
    let granularity: u64 = granularity.parse().ok()?;
    if !GRANULARITIES.contains(&granularity) || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(BucketKey {
        granularity,
        index: index.parse().ok()?,
    })
}

fn encode(records: &[IndexedRecord]) -> String {
    records
        .iter()
        .map(|r| format!("{}:{}", r.id.to_key(), r.time))
        .collect::<Vec<_>>()
        .join(",")
}
