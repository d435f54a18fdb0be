//! Backing stores for registry entries
//!
//! The registry never talks to a database directly. It reads and writes
//! opaque [`StoredRecord`]s through the [`BackingStore`] trait, and every
//! write after the first is conditional on the version the writer last saw.
//!
//! ## Backends
//!
//! - **Memory**: concurrent map, for tests and single-instance deployments
//! - **Mongo**: shared collection, for several registry instances

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;

/// Version assigned to a freshly created record
pub const INITIAL_VERSION: u64 = 1;

/// Errors raised by a backing store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `create` found an existing record under the key
    #[error("record already exists: {key}")]
    AlreadyExists { key: String },

    /// The record to update does not exist
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// The stored version did not match the precondition
    #[error("version conflict for {key}: expected {expected}, found {found:?}")]
    Conflict {
        key: String,
        expected: u64,
        found: Option<u64>,
    },

    /// The store could not be reached or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A record as held by the store
///
/// The payload is opaque to the store; the registry owns its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Unique key
    pub key: String,
    /// Membership tag used by `list_by_tag`
    pub tag: String,
    /// Bumped by one on every successful update
    pub version: u64,
    /// Encoded value
    pub payload: String,
}

/// Condition a write or delete must satisfy against the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Apply regardless of the stored version
    Always,
    /// Apply only if the stored version equals this one
    Version(u64),
}

impl Precondition {
    /// Check a stored version against this precondition
    pub fn holds(&self, stored_version: u64) -> bool {
        match self {
            Self::Always => true,
            Self::Version(expected) => *expected == stored_version,
        }
    }

    fn expected(&self) -> u64 {
        match self {
            Self::Always => 0,
            Self::Version(v) => *v,
        }
    }
}

/// Minimal key-value contract the registry is written against
///
/// Implementations must make `create`, `conditional_update` and `delete`
/// atomic with respect to each other for a single key.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Insert a new record; fails with `AlreadyExists` if the key is taken
    ///
    /// Returns the version of the new record.
    async fn create(&self, key: &str, tag: &str, payload: String) -> StoreResult<u64>;

    /// Read a record by key
    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>>;

    /// Replace the payload if the precondition holds
    ///
    /// Returns the new version.
    async fn conditional_update(
        &self,
        key: &str,
        precondition: Precondition,
        payload: String,
    ) -> StoreResult<u64>;

    /// All records carrying the tag, in no particular order
    async fn list_by_tag(&self, tag: &str) -> StoreResult<Vec<StoredRecord>>;

    /// Remove a record if the precondition holds
    ///
    /// Returns false if nothing was removed (missing key or failed precondition).
    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_holds() {
        assert!(Precondition::Always.holds(7));
        assert!(Precondition::Version(3).holds(3));
        assert!(!Precondition::Version(3).holds(4));
    }

    #[test]
    fn test_conflict_display() {
        let err = StoreError::Conflict {
            key: "service-1".into(),
            expected: 2,
            found: Some(3),
        };
        let message = err.to_string();
        assert!(message.contains("service-1"));
        assert!(message.contains("expected 2"));
    }
}
