use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Room for multipart boundaries and the text fields around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize + MULTIPART_OVERHEAD;

    let mut router = Router::new()
        // Images
        .route("/api/v1/image", get(handlers::list_images))
        .route(
            "/api/v1/image/upload",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/v1/image/:id",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        // Public blob URLs for the local backend
        .route("/storage/*key", get(handlers::serve_blob))
        .route("/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, admin routes are available.");
        router = router
            .route("/admin/blobs", get(handlers::list_blobs))
            .route("/admin/scopes/:scope", delete(handlers::retire_scope));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
