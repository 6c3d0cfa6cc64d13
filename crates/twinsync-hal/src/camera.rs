//! Generic `Camera` trait and the still image it produces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use twinsync_types::SpotError;

/// One encoded still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCapture {
    /// MIME type, e.g. `"image/jpeg"`.
    pub content_type: String,
    /// Encoded bytes exactly as delivered by the camera.
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl ImageCapture {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
            captured_at: Utc::now(),
        }
    }
}

/// A source of still images for one or more spots.
///
/// Drivers are registered with a
/// [`CameraRegistry`][crate::registry::CameraRegistry] and shared between
/// spots, so capture takes `&self`.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable identifier referenced from spot configuration, e.g. `"desk_cam"`.
    fn id(&self) -> &str;

    /// Capture a fresh still.
    ///
    /// # Errors
    ///
    /// Returns [`SpotError::Camera`] when no usable image can be obtained
    /// (device offline, empty file, HTTP failure).
    async fn capture(&self) -> Result<ImageCapture, SpotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        id: String,
    }

    #[async_trait]
    impl Camera for MockCamera {
        fn id(&self) -> &str {
            &self.id
        }

        async fn capture(&self) -> Result<ImageCapture, SpotError> {
            Ok(ImageCapture::new("image/jpeg", vec![0xFF, 0xD8, 0xFF]))
        }
    }

    #[tokio::test]
    async fn mock_camera_capture() {
        let cam = MockCamera {
            id: "desk_cam".to_string(),
        };
        assert_eq!(cam.id(), "desk_cam");
        let shot = cam.capture().await.unwrap();
        assert_eq!(shot.content_type, "image/jpeg");
        assert_eq!(shot.data.len(), 3);
    }
}
