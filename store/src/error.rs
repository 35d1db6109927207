//! Error types for the planner store
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the UI layer as plain strings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The durable store could not be opened or upgraded.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unknown index '{index}' on collection '{collection}'")]
    UnknownIndex {
        collection: &'static str,
        index: String,
    },

    #[error("{collection} record not found: {key}")]
    NotFound {
        collection: &'static str,
        key: String,
    },

    /// A cascading delete left child records behind and could not be rolled back.
    #[error("Cascade delete of {collection} '{key}' did not complete: {reason}")]
    PartialCascadeFailure {
        collection: &'static str,
        key: String,
        reason: String,
    },

    #[error("Conflict on {collection} '{key}': expected version {expected}, found {found}")]
    Conflict {
        collection: &'static str,
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("Storage IO error: {0}")]
    StorageIo(#[from] sqlx::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn not_found(collection: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            collection,
            key: key.into(),
        }
    }

    /// Whether a retry after re-reading the store could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl serde::Serialize for StoreError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
