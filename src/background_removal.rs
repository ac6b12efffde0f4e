//! Client for the remote image-matting API (remove.bg compatible).
//!
//! The request is a multipart POST carrying the image under `image_file`, a
//! `size=auto` hint and the `X-Api-Key` header. A success response body is the
//! raw cut-out image; any other response body is UTF-8 error text.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client};
use thiserror::Error;

use crate::config::BackgroundRemovalConfig;

#[derive(Debug, Error)]
pub enum BackgroundRemovalError {
    #[error("REMOVE_BG_API_KEY is not configured")]
    MissingApiKey,
    #[error("Background removal failed: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Background removal failed: {0}")]
    Transport(String),
    #[error("Background removal failed: expected image response, got: {0}")]
    UnexpectedContentType(String),
}

/// Strips the background from an encoded image.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image: Bytes) -> Result<Bytes, BackgroundRemovalError>;
}

pub struct BackgroundRemovalClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl BackgroundRemovalClient {
    /// Fails immediately when no API key is configured.
    pub fn new(config: &BackgroundRemovalConfig) -> Result<Self, BackgroundRemovalError> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(BackgroundRemovalError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackgroundRemovalError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl BackgroundRemover for BackgroundRemovalClient {
    async fn remove_background(&self, image: Bytes) -> Result<Bytes, BackgroundRemovalError> {
        tracing::info!(byte_size = image.len(), "Removing background from image");

        let part = Part::bytes(image.to_vec())
            .file_name("input.png")
            .mime_str("image/png")
            .map_err(|e| BackgroundRemovalError::Transport(e.to_string()))?;
        let form = Form::new().text("size", "auto").part("image_file", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Background removal network error");
                BackgroundRemovalError::Transport(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .bytes()
                .await
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
            tracing::error!(%status, body = %body, "Background removal API error");
            return Err(BackgroundRemovalError::Status { status, body });
        }

        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            tracing::error!(content_type = %content_type, "Background removal returned a non-image body");
            return Err(BackgroundRemovalError::UnexpectedContentType(content_type));
        }

        let data = resp
            .bytes()
            .await
            .map_err(|e| BackgroundRemovalError::Transport(e.to_string()))?;

        tracing::info!(byte_size = data.len(), "Background removed successfully");
        Ok(data)
    }
}
