//! Event row storage, one key per event.

use std::sync::Arc;

use hw_common::{row, EventId, Result, Row};
use hw_store::{Store, EVENTS_DOMAIN};
use tracing::warn;

use super::keys;

pub struct RecordStore {
    store: Arc<dyn Store>,
    subscriber: String,
}

impl RecordStore {
    pub fn new(store: Arc<dyn Store>, subscriber: impl Into<String>) -> Self {
        Self {
            store,
            subscriber: subscriber.into(),
        }
    }

    pub fn put(&self, id: EventId, row: &Row) -> Result<()> {
        let json = row::to_json(row)?;
        self.store.put(
            EVENTS_DOMAIN,
            &keys::data(&self.subscriber, id),
            json.as_bytes(),
        )?;
        Ok(())
    }

    /// Fetch a row. Rows that do not decode are reported as absent.
    pub fn get(&self, id: EventId) -> Result<Option<Row>> {
        let key = keys::data(&self.subscriber, id);
        let Some(bytes) = self.store.get(EVENTS_DOMAIN, &key)? else {
            return Ok(None);
        };
        match row::from_json(&bytes) {
            Ok(row) => Ok(Some(row)),
            Err(e) => {
                warn!(
                    subscriber = %self.subscriber,
                    key = %key,
                    error = %e,
                    "skipping undecodable event row"
                );
                Ok(None)
            }
        }
    }

    pub fn delete(&self, id: EventId) -> Result<()> {
        self.store
            .delete(EVENTS_DOMAIN, &keys::data(&self.subscriber, id))?;
        Ok(())
    }

    /// Stored ids in ascending order; `limit == 0` returns all of them.
    pub fn ids(&self, limit: usize) -> Result<Vec<EventId>> {
        let prefix = keys::data_prefix(&self.subscriber);
        let keys = self.store.scan_keys(EVENTS_DOMAIN, &prefix, limit)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = EventId::parse(&key[prefix.len()..]);
                if id.is_none() {
                    warn!(subscriber = %self.subscriber, key = %key, "ignoring malformed data key");
                }
                id
            })
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.ids(0)?.len())
    }
}
