use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image_transform::background_removal::{
    BackgroundRemovalClient, BackgroundRemovalError, BackgroundRemover,
};
use image_transform::config::BackgroundRemovalConfig;
use image_transform::object_store::{LocalStore, ObjectStore};
use image_transform::pipeline::{ImagePipeline, PipelineError};
use image_transform::storage::Database;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_URL: &str = "http://localhost:8080/storage";
const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

struct Harness {
    pipeline: ImagePipeline,
    db: Database,
    store: Arc<LocalStore>,
    _dir: tempfile::TempDir,
}

fn harness(remover: Arc<dyn BackgroundRemover>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("files"), BASE_URL).unwrap());
    let pipeline = ImagePipeline::new(db.clone(), store.clone(), remover);
    Harness {
        pipeline,
        db,
        store,
        _dir: dir,
    }
}

fn remote_remover(server: &MockServer) -> Arc<dyn BackgroundRemover> {
    Arc::new(
        BackgroundRemovalClient::new(&BackgroundRemovalConfig {
            api_key: "test-key".to_string(),
            endpoint: format!("{}/v1.0/removebg", server.uri()),
            timeout_secs: 5,
        })
        .unwrap(),
    )
}

/// Encode a PNG whose left half is `left` and right half is `right`.
fn split_png(width: u32, height: u32, left: [u8; 4], right: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            image::Rgba(left)
        } else {
            image::Rgba(right)
        }
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn mount_cutout(server: &MockServer, body: Vec<u8>) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "image/png"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_process_image_end_to_end() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(10, 10, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    let upload = split_png(10, 10, RED, RED);
    let view = h
        .pipeline
        .process_image(Bytes::from(upload.clone()), "image/png", Some("abc"))
        .await
        .unwrap();

    let records = h.db.list_images(Some("abc")).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, view.id);
    assert!(record.original_path.starts_with("original/abc/"));
    assert!(record.original_path.ends_with(".png"));
    assert!(record.processed_path.starts_with("processed/abc/"));
    assert!(record.processed_path.ends_with(".png"));

    // Both keys share the blob id.
    let stem = |key: &str| key.rsplit('/').next().unwrap().to_string();
    assert_eq!(stem(&record.original_path), stem(&record.processed_path));

    assert_eq!(view.url, format!("{BASE_URL}/{}", record.processed_path));
    assert_eq!(view.original_url, format!("{BASE_URL}/{}", record.original_path));

    let original = h.store.get(&record.original_path).await.unwrap();
    assert_eq!(original, Bytes::from(upload));

    let processed = h.store.get(&record.processed_path).await.unwrap();
    let img = image::load_from_memory_with_format(&processed, image::ImageFormat::Png)
        .unwrap()
        .to_rgba8();
    assert_eq!(img.dimensions(), (10, 10));
    assert_eq!(img.get_pixel(0, 0).0, BLUE);
    assert_eq!(img.get_pixel(9, 0).0, RED);
}

#[tokio::test]
async fn test_original_key_uses_upload_extension() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(4, 4, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    let view = h
        .pipeline
        .process_image(Bytes::from(split_png(4, 4, RED, RED)), "image/jpeg", None)
        .await
        .unwrap();

    let record = h.db.get_image(&view.id).unwrap().unwrap();
    assert!(record.original_path.starts_with("original/"));
    assert!(record.original_path.ends_with(".jpg"));
    assert_eq!(record.original_path.matches('/').count(), 1);
    assert!(record.scope_id.is_none());
}

#[tokio::test]
async fn test_remote_failure_leaves_original_without_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Invalid API key"))
        .mount(&server)
        .await;
    let h = harness(remote_remover(&server));

    let err = h
        .pipeline
        .process_image(Bytes::from(split_png(4, 4, RED, RED)), "image/png", Some("abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ExternalService(_)));
    assert!(err.to_string().contains("Invalid API key"));
    assert!(h.db.list_images(None).unwrap().is_empty());

    let originals = h.store.list(Some("original/"), 10).await.unwrap();
    assert_eq!(originals.len(), 1);
    assert!(h.store.list(Some("processed/"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_undecodable_cutout_is_transform_error() {
    let server = MockServer::start().await;
    mount_cutout(&server, b"definitely not an image".to_vec()).await;
    let h = harness(remote_remover(&server));

    let err = h
        .pipeline
        .process_image(Bytes::from(split_png(4, 4, RED, RED)), "image/png", None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transform(_)));
    assert!(h.db.list_images(None).unwrap().is_empty());
    assert!(h.store.list(Some("processed/"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_all_images_filters_and_orders() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    let mut in_scope = Vec::new();
    for scope in ["p1", "p2", "p1"] {
        let view = h
            .pipeline
            .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", Some(scope))
            .await
            .unwrap();
        if scope == "p1" {
            in_scope.push(view.id);
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    in_scope.reverse();

    let listed = h.pipeline.get_all_images(Some("p1")).unwrap();
    let ids: Vec<String> = listed.into_iter().map(|v| v.id).collect();
    assert_eq!(ids, in_scope);

    assert_eq!(h.pipeline.get_all_images(None).unwrap().len(), 3);
    assert!(h.pipeline.get_all_images(Some("p3")).unwrap().is_empty());
}

#[tokio::test]
async fn test_list_images_page_cursor() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    for _ in 0..3 {
        h.pipeline
            .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let first = h.pipeline.list_images_page(None, None, 2).unwrap();
    assert_eq!(first.images.len(), 2);
    let token = first.next_cursor.expect("more pages");

    let cursor = image_transform::storage::models::PageCursor::decode(&token).unwrap();
    let second = h.pipeline.list_images_page(None, Some(&cursor), 2).unwrap();
    assert_eq!(second.images.len(), 1);
    assert!(second.next_cursor.is_none());
    assert!(first.images.iter().all(|v| v.id != second.images[0].id));
}

#[tokio::test]
async fn test_delete_image_removes_blobs_and_record() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    let view = h
        .pipeline
        .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", Some("abc"))
        .await
        .unwrap();
    let record = h.db.get_image(&view.id).unwrap().unwrap();

    h.pipeline.delete_image(&view.id).await.unwrap();

    assert!(h.db.get_image(&view.id).unwrap().is_none());
    assert!(!h.store.exists(&record.original_path).await.unwrap());
    assert!(!h.store.exists(&record.processed_path).await.unwrap());
    assert!(matches!(
        h.pipeline.get_image_by_id(&view.id),
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_unknown_image_changes_nothing() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    h.pipeline
        .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", None)
        .await
        .unwrap();

    let err = h.pipeline.delete_image("unknown-id").await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(ref id) if id == "unknown-id"));

    assert_eq!(h.db.list_images(None).unwrap().len(), 1);
    assert_eq!(h.store.list(None, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_retire_scope() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    for scope in ["old", "old", "keep"] {
        h.pipeline
            .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", Some(scope))
            .await
            .unwrap();
    }

    let stats = h.pipeline.retire_scope("old").await.unwrap();
    assert_eq!(stats.records_deleted, 2);
    assert_eq!(stats.blobs_deleted, 4);

    assert!(h.db.list_images(Some("old")).unwrap().is_empty());
    assert_eq!(h.db.list_images(Some("keep")).unwrap().len(), 1);
    assert_eq!(h.store.list(None, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_writes_nothing() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .pipeline
        .process_image_with_cancel(
            Bytes::from(split_png(2, 2, RED, RED)),
            "image/png",
            None,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled("original upload")));
    assert!(h.store.list(None, 10).await.unwrap().is_empty());
    assert!(h.db.list_images(None).unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// Cancels the token while the remote call is in flight.
struct CancellingRemover {
    cancel: CancellationToken,
    cutout: Vec<u8>,
}

#[async_trait]
impl BackgroundRemover for CancellingRemover {
    async fn remove_background(&self, _image: Bytes) -> Result<Bytes, BackgroundRemovalError> {
        self.cancel.cancel();
        Ok(Bytes::from(self.cutout.clone()))
    }
}

#[tokio::test]
async fn test_cancelled_mid_flight_stops_at_next_step() {
    let cancel = CancellationToken::new();
    let h = harness(Arc::new(CancellingRemover {
        cancel: cancel.clone(),
        cutout: split_png(2, 2, RED, BLUE),
    }));

    let err = h
        .pipeline
        .process_image_with_cancel(
            Bytes::from(split_png(2, 2, RED, RED)),
            "image/png",
            Some("abc"),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled("flip")));
    assert_eq!(h.store.list(Some("original/abc/"), 10).await.unwrap().len(), 1);
    assert!(h.store.list(Some("processed/"), 10).await.unwrap().is_empty());
    assert!(h.db.list_images(None).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_never_collide() {
    let server = MockServer::start().await;
    mount_cutout(&server, split_png(2, 2, RED, BLUE)).await;
    let h = harness(remote_remover(&server));
    let pipeline = Arc::new(ImagePipeline::new(
        h.db.clone(),
        h.store.clone(),
        remote_remover(&server),
    ));

    let mut uploads = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        uploads.spawn(async move {
            pipeline
                .process_image(Bytes::from(split_png(2, 2, RED, RED)), "image/png", Some("shared"))
                .await
        });
    }

    let mut ids = std::collections::HashSet::new();
    while let Some(result) = uploads.join_next().await {
        ids.insert(result.unwrap().unwrap().id);
    }
    assert_eq!(ids.len(), 8);

    let records = h.db.list_images(Some("shared")).unwrap();
    assert_eq!(records.len(), 8);

    let blobs = h.store.list(None, 100).await.unwrap();
    let names: std::collections::HashSet<_> = blobs.iter().map(|b| b.name.clone()).collect();
    assert_eq!(blobs.len(), 16);
    assert_eq!(names.len(), 16);
    for record in &records {
        assert!(names.contains(&record.original_path));
        assert!(names.contains(&record.processed_path));
    }
}
