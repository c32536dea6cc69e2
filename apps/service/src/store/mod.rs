/// Durable record storage
///
/// Records are opaque JSON payloads addressed by (collection, id). The
/// scheduler only reads and rewrites records in the `checks` collection;
/// the other collections belong to the CRUD layer.
pub mod file;

pub use file::FileStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

pub const CHECKS: &str = "checks";
pub const USERS: &str = "users";
pub const TOKENS: &str = "tokens";

/// Collections created when a store is opened
pub const COLLECTIONS: [&str; 3] = [CHECKS, USERS, TOKENS];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("Record {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("Invalid record key '{0}'")]
    InvalidKey(String),

    #[error("Record {collection}/{id} is not valid JSON: {source}")]
    Malformed {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound { collection: collection.to_string(), id: id.to_string() }
    }

    pub fn already_exists(collection: &str, id: &str) -> Self {
        Self::AlreadyExists { collection: collection.to_string(), id: id.to_string() }
    }
}

/// Key/value persistence keyed by (collection, id)
///
/// Safe to call concurrently for different ids. Callers must not issue two
/// concurrent writes for the same id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record; fails with `AlreadyExists` if the id is taken
    async fn create(&self, collection: &str, id: &str, payload: &Value) -> Result<(), StoreError>;

    async fn read(&self, collection: &str, id: &str) -> Result<Value, StoreError>;

    /// Replace the whole payload of an existing record
    async fn update(&self, collection: &str, id: &str, payload: &Value) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Ids currently present; an empty or unknown collection is an empty set
    async fn list(&self, collection: &str) -> Result<BTreeSet<String>, StoreError>;
}

/// Collection names and ids double as file names
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid { Ok(()) } else { Err(StoreError::InvalidKey(key.to_string())) }
}
