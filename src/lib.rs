//! image-transform - background removal and mirroring for uploaded images
//!
//! Each upload goes through a fixed pipeline:
//! - the original is stored in blob storage under `original/{scope}/{id}.{ext}`
//! - a remote matting API strips the background
//! - the cut-out is mirrored left-to-right and stored as `processed/{scope}/{id}.png`
//! - a metadata record referencing both blobs is written to redb
//!
//! Storage backends (local filesystem, GCS) sit behind the [`object_store::ObjectStore`]
//! trait, and a REST API exposes upload, listing, lookup and deletion.

pub mod api;
pub mod background_removal;
pub mod config;
pub mod object_store;
pub mod pipeline;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod transform;

use std::sync::Arc;

use config::Config;
use pipeline::ImagePipeline;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub object_store: Arc<dyn object_store::ObjectStore>,
    pub pipeline: ImagePipeline,
}
