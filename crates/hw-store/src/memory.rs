//! Ephemeral in-process store.
//!
//! Data lives only as long as the process. Used for tests and for running
//! the engine without a data directory.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::Store;

type Domain = BTreeMap<String, Vec<u8>>;

/// `BTreeMap`-backed store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: RwLock<BTreeMap<String, Domain>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in a domain.
    pub fn len(&self, domain: &str) -> usize {
        self.domains
            .read()
            .map(|d| d.get(domain).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Whether a domain holds no keys.
    pub fn is_empty(&self, domain: &str) -> bool {
        self.len(domain) == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl Store for MemoryStore {
    fn get(&self, domain: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let domains = self.domains.read().map_err(|_| poisoned())?;
        Ok(domains.get(domain).and_then(|d| d.get(key)).cloned())
    }

    fn put(&self, domain: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut domains = self.domains.write().map_err(|_| poisoned())?;
        domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, domain: &str, key: &str) -> StoreResult<()> {
        let mut domains = self.domains.write().map_err(|_| poisoned())?;
        if let Some(d) = domains.get_mut(domain) {
            d.remove(key);
        }
        Ok(())
    }

    fn scan_keys(&self, domain: &str, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        let domains = self.domains.read().map_err(|_| poisoned())?;
        let Some(d) = domains.get(domain) else {
            return Ok(Vec::new());
        };
        let iter = d
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }
}
