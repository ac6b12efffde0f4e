mod gcs;
mod local;

pub use gcs::GcsStore;
pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use thiserror::Error;

/// Upper bound for a single `list` call. There is no continuation token.
pub const LIST_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// The blob key, which doubles as the object id.
    pub id: String,
    pub public_url: String,
}

/// A blob as reported by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub public_url: String,
}

/// Abstraction over blob storage backends.
/// Keys are store-relative paths such as `processed/{scope}/{uuid}.png`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a new object. Fails with `AlreadyExists` rather than overwriting.
    async fn put(&self, key: &str, data: Bytes, content_type: &str)
        -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Remove an object. Fails with `NotFound` when the key does not exist.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    /// List at most `min(limit, LIST_PAGE_SIZE)` objects under `prefix`, ordered by name.
    async fn list(
        &self,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectInfo>, ObjectStoreError>;

    /// Public URL for a key. Pure string construction, no I/O.
    fn public_url(&self, key: &str) -> String;

    async fn upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<UploadedObject, ObjectStoreError> {
        validate_key(key)?;
        let byte_size = data.len();
        self.put(key, data, content_type).await?;
        tracing::debug!(key = %key, byte_size, content_type = %content_type, "Uploaded object");
        Ok(UploadedObject {
            id: key.to_string(),
            public_url: self.public_url(key),
        })
    }
}

/// Reject keys that are empty, absolute, or that step outside the store root.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Everything but RFC 3986 unreserved characters is escaped inside a path segment.
const URL_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `{base}/{key}` with each key segment percent-encoded.
fn join_url(base: &str, key: &str) -> String {
    let path = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, URL_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", base.trim_end_matches('/'), path)
}
