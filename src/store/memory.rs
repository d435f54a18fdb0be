//! In-memory backing store
//!
//! Single-process only. Every per-key operation runs under the map's shard
//! lock, which is what makes conditional updates atomic here.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{BackingStore, Precondition, StoreError, StoreResult, StoredRecord, INITIAL_VERSION};

/// Concurrent map of key -> record
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, StoredRecord>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of records, expired or not
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write a record verbatim, bypassing version checks
    ///
    /// Used to seed foreign or corrupt data in tests.
    pub fn insert_raw(&self, record: StoredRecord) {
        self.records.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, key: &str, tag: &str, payload: String) -> StoreResult<u64> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(StoredRecord {
                    key: key.to_string(),
                    tag: tag.to_string(),
                    version: INITIAL_VERSION,
                    payload,
                });
                debug!(key = %key, "Created record");
                Ok(INITIAL_VERSION)
            }
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn conditional_update(
        &self,
        key: &str,
        precondition: Precondition,
        payload: String,
    ) -> StoreResult<u64> {
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;

        if !precondition.holds(record.version) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: precondition.expected(),
                found: Some(record.version),
            });
        }

        record.version += 1;
        record.payload = payload;
        Ok(record.version)
    }

    async fn list_by_tag(&self, tag: &str) -> StoreResult<Vec<StoredRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<bool> {
        let removed = self
            .records
            .remove_if(key, |_, record| precondition.holds(record.version))
            .is_some();
        if removed {
            debug!(key = %key, "Deleted record");
        }
        Ok(removed)
    }
}
