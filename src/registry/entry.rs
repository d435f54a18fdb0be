//! Registry entries and their encoding at the store boundary

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, StoreResult};
use crate::types::Service;

/// Value stored for each registered service
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    /// The announced service
    pub service: Service,
    /// Time of the most recent accepted heartbeat
    #[serde(rename = "update")]
    pub last_update: DateTime<Utc>,
}

impl RegistryEntry {
    /// Create an entry stamped at `now`
    pub fn new(service: Service, now: DateTime<Utc>) -> Self {
        Self {
            service,
            last_update: now,
        }
    }

    /// Expired entries stay in the store but are hidden from readers
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.last_update
            .checked_add_signed(ttl)
            .is_some_and(|deadline| deadline <= now)
    }

    /// Whether the entry has been expired for longer than `grace`
    pub fn is_reclaimable(&self, now: DateTime<Utc>, ttl: Duration, grace: Duration) -> bool {
        self.last_update
            .checked_add_signed(ttl)
            .and_then(|expiry| expiry.checked_add_signed(grace))
            .is_some_and(|reclaim_at| reclaim_at < now)
    }

    /// Encode for storage
    pub fn encode(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode a stored payload
    pub fn decode(payload: &str) -> StoreResult<Self> {
        serde_json::from_str(payload).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
