//! Hostwatch key-value storage.
//!
//! This crate provides:
//! - The [`Store`] trait every engine component persists through
//! - [`MemoryStore`], an ephemeral in-process backend
//! - [`DirStore`], a durable backend writing one file per key

pub mod dir;
pub mod error;
pub mod memory;

pub use dir::{DirStore, DEFAULT_LOCK_TIMEOUT};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

/// Domain holding all event subscriber data.
pub const EVENTS_DOMAIN: &str = "events";

/// Ordered, namespaced key-value store.
///
/// Keys within a domain are kept in byte order; `scan_keys` returns them in
/// that order. Each individual write is expected to be crash-consistent.
pub trait Store: Send + Sync {
    /// Fetch a value. A missing key is `Ok(None)`, not an error.
    fn get(&self, domain: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or replace a value.
    fn put(&self, domain: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove a key. Removing a missing key succeeds.
    fn delete(&self, domain: &str, key: &str) -> StoreResult<()>;

    /// Keys starting with `prefix`, in order. `limit == 0` means unlimited.
    fn scan_keys(&self, domain: &str, prefix: &str, limit: usize) -> StoreResult<Vec<String>>;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn get(&self, domain: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(domain, key)
    }

    fn put(&self, domain: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).put(domain, key, value)
    }

    fn delete(&self, domain: &str, key: &str) -> StoreResult<()> {
        (**self).delete(domain, key)
    }

    fn scan_keys(&self, domain: &str, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        (**self).scan_keys(domain, prefix, limit)
    }
}
