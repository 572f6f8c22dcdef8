//! Shared helpers for hw-core integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hw_common::{EventTime, Row};
use hw_core::events::{EventSubscriber, ManualClock, RowSubscriber, SubscriberOptions};
use hw_store::{MemoryStore, Store, StoreError, StoreResult};

pub const NOW: EventTime = 1_700_000_000;

pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn eids(rows: &[Row]) -> Vec<u64> {
    rows.iter()
        .map(|r| r["eid"].parse().expect("eid is numeric"))
        .collect()
}

pub fn options(max_events: u64, expiry_seconds: u64) -> SubscriberOptions {
    SubscriberOptions {
        max_events,
        expiry_seconds,
        ..SubscriberOptions::default()
    }
}

/// A subscriber over `store` driven by a manual clock at [`NOW`].
pub fn subscriber(
    store: Arc<dyn Store>,
    options: SubscriberOptions,
) -> (Arc<ManualClock>, Arc<EventSubscriber<RowSubscriber>>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let sub = EventSubscriber::new(RowSubscriber::new("file_events"), store, options)
        .expect("valid subscriber")
        .with_clock(clock.clone());
    (clock, Arc::new(sub))
}

/// Which operation a [`FaultyStore`] rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Put,
    Delete,
    Scan,
}

/// Wraps a [`MemoryStore`] and fails operations on keys matching a prefix.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    rules: Mutex<Vec<(Op, String)>>,
    failures: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: Op, prefix: &str) {
        self.rules.lock().unwrap().push((op, prefix.to_string()));
    }

    pub fn heal(&self) {
        self.rules.lock().unwrap().clear();
    }

    /// Operations rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, op: Op, key: &str) -> StoreResult<()> {
        let rules = self.rules.lock().unwrap();
        if rules.iter().any(|(o, prefix)| *o == op && key.starts_with(prefix.as_str())) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable(format!("injected {:?} failure on {}", op, key)));
        }
        Ok(())
    }
}

impl Store for FaultyStore {
    fn get(&self, domain: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check(Op::Get, key)?;
        self.inner.get(domain, key)
    }

    fn put(&self, domain: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check(Op::Put, key)?;
        self.inner.put(domain, key, value)
    }

    fn delete(&self, domain: &str, key: &str) -> StoreResult<()> {
        self.check(Op::Delete, key)?;
        self.inner.delete(domain, key)
    }

    fn scan_keys(&self, domain: &str, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.check(Op::Scan, prefix)?;
        self.inner.scan_keys(domain, prefix, limit)
    }
}
