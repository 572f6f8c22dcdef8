//! Per-subscriber event id allocation.
//!
//! The counter lives at `eid.<sub>` and is rewritten on every allocation, so
//! an id handed out once is never handed out again, even after a restart.

use std::sync::{Arc, Mutex};

use hw_common::{Error, EventId, Result};
use hw_store::{Store, EVENTS_DOMAIN};
use tracing::error;

use super::keys;

/// Issues strictly increasing ids for one subscriber.
pub struct IdAllocator {
    store: Arc<dyn Store>,
    subscriber: String,
    // None until the persisted counter has been read.
    last: Mutex<Option<EventId>>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn Store>, subscriber: impl Into<String>) -> Self {
        Self {
            store,
            subscriber: subscriber.into(),
            last: Mutex::new(None),
        }
    }

    /// Allocate the next id and persist it as the new high-water mark.
    pub fn next_id(&self) -> Result<EventId> {
        let mut last = self.lock()?;
        let current = match *last {
            Some(id) => id,
            None => self.load()?,
        };

        let Some(next) = current.next() else {
            *last = Some(current);
            return Err(Error::AllocationFailed {
                subscriber: self.subscriber.clone(),
                reason: format!("event id space exhausted at {}", current),
            });
        };
        let key = keys::eid(&self.subscriber);
        if let Err(e) = self
            .store
            .put(EVENTS_DOMAIN, &key, next.to_key().as_bytes())
        {
            error!(
                subscriber = %self.subscriber,
                error = %e,
                "failed to persist event id counter"
            );
            // Keep what we read so the next attempt does not re-read.
            *last = Some(current);
            return Err(Error::AllocationFailed {
                subscriber: self.subscriber.clone(),
                reason: e.to_string(),
            });
        }

        *last = Some(next);
        Ok(next)
    }

    /// The last id issued, or [`EventId::ZERO`] if none has been.
    pub fn last_id(&self) -> Result<EventId> {
        let mut last = self.lock()?;
        match *last {
            Some(id) => Ok(id),
            None => {
                let id = self.load()?;
                *last = Some(id);
                Ok(id)
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<EventId>>> {
        self.last.lock().map_err(|_| {
            Error::StoreUnavailable(format!("id allocator for {} poisoned", self.subscriber))
        })
    }

    fn load(&self) -> Result<EventId> {
        let key = keys::eid(&self.subscriber);
        let Some(bytes) = self.store.get(EVENTS_DOMAIN, &key)? else {
            return Ok(EventId::ZERO);
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| EventId::parse(s.trim()))
            .ok_or_else(|| {
                Error::StoreUnavailable(format!("corrupt event id counter at {}", key))
            })
    }
}
