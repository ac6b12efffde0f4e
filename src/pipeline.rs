//! Upload pipeline: original upload, background removal, mirroring, processed
//! upload, metadata record.
//!
//! Steps run strictly in order and the first failure aborts the rest. Nothing is
//! rolled back: blobs written before a failing step stay in the object store
//! without a metadata record.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::background_removal::{BackgroundRemovalError, BackgroundRemover};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::{ImageRecord, PageCursor};
use crate::storage::{Database, DatabaseError};
use crate::transform::{self, TransformError, PROCESSED_CONTENT_TYPE};

pub const ORIGINAL_PREFIX: &str = "original";
pub const PROCESSED_PREFIX: &str = "processed";

/// Characters that cannot appear verbatim in a single blob key segment.
const SCOPE_ESCAPES: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b'%');

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    ExternalService(#[from] BackgroundRemovalError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Storage(#[from] ObjectStoreError),
    #[error(transparent)]
    Database(DatabaseError),
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Processing cancelled before {0}")]
    Cancelled(&'static str),
}

impl From<DatabaseError> for PipelineError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Database(other),
        }
    }
}

/// An image as handed back to callers, with both blob keys resolved to public URLs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub id: String,
    /// Processed (background-removed, mirrored) image.
    pub url: String,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListing {
    pub images: Vec<ImageView>,
    pub next_cursor: Option<String>,
}

/// Outcome of retiring a scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeRetirement {
    pub blobs_deleted: u64,
    pub records_deleted: u64,
}

pub struct ImagePipeline {
    db: Database,
    object_store: Arc<dyn ObjectStore>,
    remover: Arc<dyn BackgroundRemover>,
}

impl ImagePipeline {
    pub fn new(
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        remover: Arc<dyn BackgroundRemover>,
    ) -> Self {
        Self {
            db,
            object_store,
            remover,
        }
    }

    pub async fn process_image(
        &self,
        data: Bytes,
        mime_type: &str,
        scope: Option<&str>,
    ) -> Result<ImageView, PipelineError> {
        self.process_image_with_cancel(data, mime_type, scope, &CancellationToken::new())
            .await
    }

    /// Run the pipeline, checking `cancel` between steps. An external call that
    /// is already in flight is allowed to finish.
    pub async fn process_image_with_cancel(
        &self,
        data: Bytes,
        mime_type: &str,
        scope: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ImageView, PipelineError> {
        let scope = normalize_scope(scope);
        let blob_id = uuid::Uuid::new_v4().to_string();
        info!(blob_id = %blob_id, scope = ?scope, mime_type = %mime_type, "Processing image");

        checkpoint(cancel, "original upload")?;
        let original_key = blob_key(ORIGINAL_PREFIX, scope, &blob_id, extension_for_mime(mime_type));
        info!(key = %original_key, "Step 1: uploading original");
        let original = self
            .object_store
            .upload(data.clone(), &original_key, mime_type)
            .await?;

        checkpoint(cancel, "background removal")?;
        info!("Step 2: removing background");
        let cutout = self.remover.remove_background(data).await?;

        checkpoint(cancel, "flip")?;
        info!("Step 3: flipping image horizontally");
        let flipped = transform::flip_horizontal(&cutout)?;

        checkpoint(cancel, "processed upload")?;
        let processed_key = blob_key(PROCESSED_PREFIX, scope, &blob_id, "png");
        info!(key = %processed_key, "Step 4: uploading processed image");
        let processed = self
            .object_store
            .upload(Bytes::from(flipped), &processed_key, PROCESSED_CONTENT_TYPE)
            .await?;

        checkpoint(cancel, "metadata write")?;
        info!("Step 5: recording metadata");
        let record = self.db.create_image(&original.id, &processed.id, scope)?;

        let view = self.view(&record);
        info!(image_id = %view.id, url = %view.url, "Image processed successfully");
        Ok(view)
    }

    /// Every image, optionally within one scope, newest first.
    pub fn get_all_images(&self, scope: Option<&str>) -> Result<Vec<ImageView>, PipelineError> {
        let records = self.db.list_images(normalize_scope(scope))?;
        tracing::debug!(count = records.len(), "Listed images");
        Ok(records.iter().map(|r| self.view(r)).collect())
    }

    pub fn list_images_page(
        &self,
        scope: Option<&str>,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<ImageListing, PipelineError> {
        let page = self
            .db
            .list_images_page(normalize_scope(scope), cursor, limit)?;
        Ok(ImageListing {
            images: page.items.iter().map(|r| self.view(r)).collect(),
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }

    pub fn get_image_by_id(&self, id: &str) -> Result<ImageView, PipelineError> {
        let record = self
            .db
            .get_image(id)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        Ok(self.view(&record))
    }

    /// Remove the metadata record, then the original and processed blobs.
    ///
    /// A blob failure after the record is gone is returned as-is and leaves the
    /// remaining blob orphaned.
    pub async fn delete_image(&self, id: &str) -> Result<(), PipelineError> {
        info!(image_id = %id, "Deleting image");
        let record = self.db.delete_image(id)?;

        self.object_store.delete(&record.original_path).await?;
        self.object_store.delete(&record.processed_path).await?;

        info!(image_id = %id, "Image deleted");
        Ok(())
    }

    /// Delete all blobs of a scope, then its metadata records.
    pub async fn retire_scope(&self, scope: &str) -> Result<ScopeRetirement, PipelineError> {
        let mut stats = ScopeRetirement::default();
        let Some(scope) = normalize_scope(Some(scope)) else {
            return Ok(stats);
        };
        let records = self.db.list_images(Some(scope))?;

        for record in &records {
            for key in [&record.original_path, &record.processed_path] {
                match self.object_store.delete(key).await {
                    Ok(()) => stats.blobs_deleted += 1,
                    // Already gone.
                    Err(ObjectStoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        stats.records_deleted = self.db.delete_images_by_scope(scope)?;
        tracing::debug!(
            scope = %scope,
            blobs = stats.blobs_deleted,
            records = stats.records_deleted,
            "Scope blobs and records removed"
        );
        Ok(stats)
    }

    fn view(&self, record: &ImageRecord) -> ImageView {
        ImageView {
            id: record.id.clone(),
            url: self.object_store.public_url(&record.processed_path),
            original_url: self.object_store.public_url(&record.original_path),
            created_at: record.created_at,
        }
    }
}

fn checkpoint(cancel: &CancellationToken, next_step: &'static str) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        tracing::warn!(step = next_step, "Image processing cancelled");
        return Err(PipelineError::Cancelled(next_step));
    }
    Ok(())
}

/// Scopes are opaque; only the empty string means "no scope".
fn normalize_scope(scope: Option<&str>) -> Option<&str> {
    scope.filter(|s| !s.is_empty())
}

/// Encode a scope as exactly one key segment. Slashes, backslashes, `%` and control
/// characters are percent-escaped, and the dot segments are escaped whole.
pub fn scope_segment(scope: &str) -> Cow<'_, str> {
    match scope {
        "." => Cow::Borrowed("%2E"),
        ".." => Cow::Borrowed("%2E%2E"),
        _ => utf8_percent_encode(scope, SCOPE_ESCAPES).into(),
    }
}

/// `{prefix}/{scope}/{id}.{ext}`, or `{prefix}/{id}.{ext}` without a scope.
pub fn blob_key(prefix: &str, scope: Option<&str>, id: &str, ext: &str) -> String {
    match scope {
        Some(scope) => format!("{prefix}/{}/{id}.{ext}", scope_segment(scope)),
        None => format!("{prefix}/{id}.{ext}"),
    }
}

/// File extension for an upload's MIME type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_layout() {
        assert_eq!(
            blob_key(ORIGINAL_PREFIX, Some("abc"), "123", "jpg"),
            "original/abc/123.jpg"
        );
        assert_eq!(
            blob_key(PROCESSED_PREFIX, None, "123", "png"),
            "processed/123.png"
        );
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/jpg"), "jpg");
        assert_eq!(extension_for_mime("IMAGE/PNG"), "png");
        assert_eq!(extension_for_mime("image/gif"), "gif");
        assert_eq!(extension_for_mime("image/webp; q=1"), "webp");
        assert_eq!(extension_for_mime("no-such/type"), "bin");
    }

    #[test]
    fn test_normalize_scope() {
        assert_eq!(normalize_scope(Some(" abc ")), Some(" abc "));
        assert_eq!(normalize_scope(Some("")), None);
        assert_eq!(normalize_scope(None), None);
    }

    #[test]
    fn test_scope_is_always_one_valid_segment() {
        assert_eq!(
            blob_key(ORIGINAL_PREFIX, Some("x/../y"), "1", "png"),
            "original/x%2F..%2Fy/1.png"
        );
        assert_eq!(blob_key(PROCESSED_PREFIX, Some("a/"), "1", "png"), "processed/a%2F/1.png");
        assert_eq!(blob_key(PROCESSED_PREFIX, Some(".."), "1", "png"), "processed/%2E%2E/1.png");
        assert_eq!(blob_key(PROCESSED_PREFIX, Some("q?x"), "1", "png"), "processed/q?x/1.png");
        assert_eq!(blob_key(PROCESSED_PREFIX, Some("50%"), "1", "png"), "processed/50%25/1.png");

        for scope in ["x/../y", "a/", ".", "..", "a\\b", " abc", "q?x", "tag#1", "line\nbreak"] {
            let key = blob_key(ORIGINAL_PREFIX, Some(scope), "1", "png");
            assert!(crate::object_store::validate_key(&key).is_ok(), "{key:?}");
            assert_eq!(key.matches('/').count(), 2, "{key:?}");
        }
    }
}
