//! Store traits describing the external collaborators the page pipeline
//! talks to.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::domain::entities::ContentRecord;
use crate::domain::types::BranchContext;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode `{key}`: {message}")]
    Decode { key: String, message: String },
    #[error("invalid store path `{path}`")]
    InvalidPath { path: String },
}

impl StoreError {
    pub fn from_backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn decode(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: key.into(),
            message: err.to_string(),
        }
    }
}

/// Read access to the content repository, scoped by branch.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// All records of a type, in the store's stable order.
    async fn query_by_type(
        &self,
        ctx: &BranchContext,
        type_qname: &str,
    ) -> Result<Vec<ContentRecord>, StoreError>;

    async fn read_record(
        &self,
        ctx: &BranchContext,
        id: &str,
    ) -> Result<Option<ContentRecord>, StoreError>;
}

/// Shared key/value cache with per-entry expiry.
///
/// Implementations must make `set_if_absent` atomic; the page directory relies
/// on it to elect a single rebuilder.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn write(&self, key: &str, value: Value, ttl: Option<Duration>)
    -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Store `value` only if `key` holds no live entry. Returns whether it did.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;
}

/// Path-addressed artifact storage.
#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn exists_file(&self, path: &str) -> Result<bool, StoreError>;

    async fn write_file(&self, path: &str, bytes: Bytes) -> Result<(), StoreError>;

    async fn read_file(&self, path: &str) -> Result<Option<Bytes>, StoreError>;

    /// Returns whether a file was removed.
    async fn delete_file(&self, path: &str) -> Result<bool, StoreError>;

    /// Names of the entries directly under `dir`, sorted. A missing directory
    /// lists as empty.
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, StoreError>;
}
