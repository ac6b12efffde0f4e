mod admin;
mod blobs;
mod images;

use crate::api::response::ApiError;
use crate::object_store::ObjectStoreError;
use crate::pipeline::PipelineError;

pub use admin::{health, list_blobs, retire_scope};
pub use blobs::serve_blob;
pub use images::{delete_image, get_image, list_images, upload_image};

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::NotFound(_) => ApiError::not_found("Image not found"),
            PipelineError::ExternalService(e) => ApiError::bad_gateway(e.to_string()),
            PipelineError::Transform(e) => ApiError::unprocessable(e.to_string()),
            PipelineError::Storage(e) => ApiError::from(e),
            PipelineError::Cancelled(step) => {
                ApiError::unavailable(format!("Processing cancelled before {step}"))
            }
            PipelineError::Database(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(_) => ApiError::not_found(e.to_string()),
            ObjectStoreError::AlreadyExists(_) => ApiError::conflict(e.to_string()),
            ObjectStoreError::InvalidKey(_) => ApiError::bad_request(e.to_string()),
            ObjectStoreError::Io(_) | ObjectStoreError::Backend(_) => {
                ApiError::internal(format!("Storage failure: {e}"))
            }
        }
    }
}
