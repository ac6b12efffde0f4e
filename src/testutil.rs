//! Shared test helpers for router and pipeline tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::background_removal::{BackgroundRemovalError, BackgroundRemover};
use crate::config::{BackgroundRemovalConfig, Config, NodeConfig, StorageConfig};
use crate::object_store::LocalStore;
use crate::pipeline::ImagePipeline;
use crate::storage::Database;
use crate::AppState;

/// Returns the input unchanged, as if the image had no background.
pub struct PassthroughRemover;

#[async_trait]
impl BackgroundRemover for PassthroughRemover {
    async fn remove_background(&self, image: Bytes) -> Result<Bytes, BackgroundRemovalError> {
        Ok(image)
    }
}

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    Config {
        background_removal: BackgroundRemovalConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        },
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: temp_dir.path().join("files").to_string_lossy().to_string(),
            ..Default::default()
        },
        allowed_scope: None,
        test_mode: true,
        max_upload_size: 10 * 1024 * 1024,
    }
}

/// Create a test AppState with a temporary database and local object store.
pub fn test_state(config: Config) -> Arc<AppState> {
    let db = Database::open(&config.node.data_dir).expect("Failed to open test database");
    let object_store = Arc::new(
        LocalStore::new(
            &config.storage.local_storage_path,
            &config.storage.public_base_url,
        )
        .expect("Failed to create test object store"),
    );

    let pipeline = ImagePipeline::new(db, object_store.clone(), Arc::new(PassthroughRemover));

    Arc::new(AppState {
        config,
        object_store,
        pipeline,
    })
}

/// Encode a solid-colour RGBA PNG.
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode test PNG");
    out.into_inner()
}
