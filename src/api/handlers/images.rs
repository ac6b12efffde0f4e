use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::pipeline::{ImageListing, ImageView};
use crate::storage::models::PageCursor;
use crate::AppState;

/// MIME types accepted for upload.
pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListImagesParams {
    #[serde(default, alias = "pageId")]
    pub scope: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut scope: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_content_type = field.content_type().map(|s| s.to_string());

                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() as u64 > state.config.max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {} bytes",
                        state.config.max_upload_size
                    )));
                }
                file_data = Some(data);
            }
            "scope" | "pageId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid scope: {e}")))?;
                // Opaque: kept byte-for-byte, only an empty value means no scope.
                scope = Some(text).filter(|s| !s.is_empty());
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    if file_data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    // Multipart Content-Type first, then a guess from the filename.
    let mime_type = file_content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(|n| mime_guess::from_path(n).first())
                .map(|m| m.to_string())
        })
        .map(|m| m.to_ascii_lowercase())
        .unwrap_or_default();

    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(ApiError::bad_request(
            "File must be an image (jpeg, jpg, png, gif, or webp)",
        ));
    }

    if let Some(ref allowed) = state.config.allowed_scope {
        if scope.as_deref() != Some(allowed.as_str()) {
            return Err(ApiError::bad_request("Invalid scope"));
        }
    }

    let image = state
        .pipeline
        .process_image(file_data, &mime_type, scope.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to process image");
            ApiError::from(e)
        })?;

    Ok(JSend::success(UploadResponse {
        id: image.id,
        url: image.url,
        created_at: image.created_at,
    }))
}

pub async fn list_images(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListImagesParams>,
) -> Result<Json<JSend<ImageListing>>, ApiError> {
    let scope = params.scope.as_deref();

    // Without paging parameters the full listing is returned.
    if params.limit.is_none() && params.cursor.is_none() {
        let images = state.pipeline.get_all_images(scope)?;
        return Ok(JSend::success(ImageListing {
            images,
            next_cursor: None,
        }));
    }

    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }

    let cursor = match params.cursor.as_deref() {
        Some(token) => {
            Some(PageCursor::decode(token).ok_or_else(|| ApiError::bad_request("Invalid cursor"))?)
        }
        None => None,
    };

    let listing = state
        .pipeline
        .list_images_page(scope, cursor.as_ref(), limit as usize)?;
    Ok(JSend::success(listing))
}

pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<ImageView>>, ApiError> {
    let image = state.pipeline.get_image_by_id(&id)?;
    Ok(JSend::success(image))
}

pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    state.pipeline.delete_image(&id).await?;
    Ok(JSend::success(()))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::payload_too_large(e.body_text());
    }
    ApiError::bad_request(format!("Invalid multipart data: {e}"))
}
