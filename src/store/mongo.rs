//! MongoDB backing store
//!
//! One document per record. Conditional writes are expressed as filters on
//! `version`, so several registry instances can share a collection without
//! any process-local lock.

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use futures_util::StreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BackingStore, Precondition, StoreError, StoreResult, StoredRecord, INITIAL_VERSION};

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Record document as stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecordDoc {
    /// Record key doubles as the document ID
    #[serde(rename = "_id")]
    pub key: String,
    /// Membership tag
    pub tag: String,
    /// BSON has no unsigned integers
    pub version: i64,
    /// Encoded value
    pub payload: String,
    /// Server-side bookkeeping only
    pub updated_at: DateTime,
}

impl RecordDoc {
    fn new(key: &str, tag: &str, payload: String) -> Self {
        Self {
            key: key.to_string(),
            tag: tag.to_string(),
            version: INITIAL_VERSION as i64,
            payload,
            updated_at: DateTime::now(),
        }
    }
}

impl From<RecordDoc> for StoredRecord {
    fn from(doc: RecordDoc) -> Self {
        Self {
            key: doc.key,
            tag: doc.tag,
            version: u64::try_from(doc.version).unwrap_or(0),
            payload: doc.payload,
        }
    }
}

/// Filter selecting a key, narrowed by a precondition
fn precondition_filter(key: &str, precondition: Precondition) -> Document {
    match precondition {
        Precondition::Always => doc! { "_id": key },
        Precondition::Version(v) => doc! { "_id": key, "version": v as i64 },
    }
}

fn update_document(payload: String) -> Document {
    doc! {
        "$set": { "payload": payload, "updated_at": DateTime::now() },
        "$inc": { "version": 1_i64 },
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE
    )
}

fn unavailable(op: &str, err: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(format!("{} failed: {}", op, err))
}

/// One document from a listing cursor
///
/// A document that fails to decode is skipped; anything else (a failed
/// getMore, a dropped connection) fails the whole listing.
fn cursor_item(item: mongodb::error::Result<RecordDoc>) -> StoreResult<Option<StoredRecord>> {
    match item {
        Ok(doc) => Ok(Some(StoredRecord::from(doc))),
        Err(e) if matches!(e.kind.as_ref(), ErrorKind::BsonDeserialization(_)) => {
            warn!("Skipping undecodable record document: {}", e);
            Ok(None)
        }
        Err(e) => Err(unavailable("cursor", e)),
    }
}

/// Backing store over a MongoDB collection
#[derive(Clone)]
pub struct MongoStore {
    collection: Collection<RecordDoc>,
}

impl MongoStore {
    /// Connect, verify with a ping, and ensure the tag index exists
    pub async fn connect(uri: &str, db_name: &str, collection: &str) -> StoreResult<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| unavailable("connect", e))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| unavailable("ping", e))?;

        let store = Self {
            collection: client.database(db_name).collection::<RecordDoc>(collection),
        };
        store.apply_indexes().await?;

        info!(
            "Connected to MongoDB database '{}' (collection '{}')",
            db_name, collection
        );
        Ok(store)
    }

    /// Wrap an existing collection
    pub fn from_collection(collection: Collection<RecordDoc>) -> Self {
        Self { collection }
    }

    async fn apply_indexes(&self) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "tag": 1 })
            .options(IndexOptions::builder().name("tag_1".to_string()).build())
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(|e| unavailable("create index", e))?;
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MongoStore {
    fn name(&self) -> &'static str {
        "mongo"
    }

    async fn create(&self, key: &str, tag: &str, payload: String) -> StoreResult<u64> {
        match self.collection.insert_one(RecordDoc::new(key, tag, payload)).await {
            Ok(_) => Ok(INITIAL_VERSION),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
            Err(e) => Err(unavailable("insert", e)),
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredRecord>> {
        let found = self
            .collection
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| unavailable("find", e))?;
        Ok(found.map(StoredRecord::from))
    }

    async fn conditional_update(
        &self,
        key: &str,
        precondition: Precondition,
        payload: String,
    ) -> StoreResult<u64> {
        let updated = self
            .collection
            .find_one_and_update(
                precondition_filter(key, precondition),
                update_document(payload),
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| unavailable("update", e))?;

        if let Some(doc) = updated {
            return Ok(StoredRecord::from(doc).version);
        }

        // Nothing matched: tell a missing key apart from a lost race
        match self.read(key).await? {
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Some(current) => Err(StoreError::Conflict {
                key: key.to_string(),
                expected: precondition.expected(),
                found: Some(current.version),
            }),
        }
    }

    async fn list_by_tag(&self, tag: &str) -> StoreResult<Vec<StoredRecord>> {
        let mut cursor = self
            .collection
            .find(doc! { "tag": tag })
            .await
            .map_err(|e| unavailable("find", e))?;

        let mut records = Vec::new();
        while let Some(item) = cursor.next().await {
            if let Some(record) = cursor_item(item)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<bool> {
        let result = self
            .collection
            .delete_one(precondition_filter(key, precondition))
            .await
            .map_err(|e| unavailable("delete", e))?;
        Ok(result.deleted_count > 0)
    }
}
