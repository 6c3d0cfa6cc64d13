//! Snapshot camera drivers.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use twinsync_types::SpotError;

use crate::camera::{Camera, ImageCapture};

fn fault(camera: &str, details: impl Into<String>) -> SpotError {
    SpotError::Camera {
        camera: camera.to_string(),
        details: details.into(),
    }
}

/// MIME type guessed from a file extension.
fn content_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FileCamera
// ─────────────────────────────────────────────────────────────────────────────

/// Reads a still image from disk on every capture.
///
/// Useful with any external tool that periodically overwrites a snapshot
/// file, and for tests.
#[derive(Debug, Clone)]
pub struct FileCamera {
    id: String,
    path: PathBuf,
}

impl FileCamera {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Camera for FileCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&self) -> Result<ImageCapture, SpotError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| fault(&self.id, format!("{}: {e}", self.path.display())))?;
        if data.is_empty() {
            return Err(fault(&self.id, format!("{} is empty", self.path.display())));
        }
        debug!(camera = %self.id, bytes = data.len(), "snapshot read from file");
        Ok(ImageCapture::new(content_type_for(&self.path), data))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpSnapshotCamera
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches a still image from an HTTP snapshot endpoint (IP cameras, NVRs).
pub struct HttpSnapshotCamera {
    id: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSnapshotCamera {
    /// Create a driver for `url`; each capture is bounded by `timeout`.
    pub fn new(id: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            id: id.into(),
            url: url.into(),
            client,
        }
    }

    /// Use a preconfigured HTTP client (custom TLS roots, proxy settings).
    pub fn with_client(id: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Camera for HttpSnapshotCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&self) -> Result<ImageCapture, SpotError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| fault(&self.id, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(fault(&self.id, format!("snapshot returned HTTP {}", resp.status())));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        let data = resp
            .bytes()
            .await
            .map_err(|e| fault(&self.id, e.to_string()))?
            .to_vec();
        if data.is_empty() {
            return Err(fault(&self.id, "snapshot body is empty"));
        }
        debug!(camera = %self.id, bytes = data.len(), "snapshot fetched");
        Ok(ImageCapture::new(content_type, data))
    }
}
