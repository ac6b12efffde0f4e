use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::object_store::{ObjectInfo, LIST_PAGE_SIZE};
use crate::pipeline::ScopeRetirement;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct ListBlobsParams {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_blob_limit")]
    pub limit: usize,
}

fn default_blob_limit() -> usize {
    LIST_PAGE_SIZE
}

#[derive(Debug, Serialize)]
pub struct BlobListResponse {
    pub blobs: Vec<ObjectInfo>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Raw blob listing straight from the object store. Capped, no continuation.
pub async fn list_blobs(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListBlobsParams>,
) -> Result<Json<JSend<BlobListResponse>>, ApiError> {
    let blobs = state
        .object_store
        .list(params.prefix.as_deref(), params.limit)
        .await?;

    Ok(JSend::success(BlobListResponse { blobs }))
}

pub async fn retire_scope(
    State(state): State<Arc<AppState>>,
    Path(scope): Path<String>,
) -> Result<Json<JSend<ScopeRetirement>>, ApiError> {
    let stats = state.pipeline.retire_scope(&scope).await?;

    tracing::warn!(
        scope = %scope,
        records = stats.records_deleted,
        blobs = stats.blobs_deleted,
        "Retired scope"
    );

    Ok(JSend::success(stats))
}
