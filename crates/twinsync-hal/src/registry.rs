//! [`CameraRegistry`] – resolves camera references from spot configuration.

use std::collections::HashMap;
use std::sync::Arc;

use twinsync_types::SpotError;

use crate::camera::Camera;

/// Central camera driver registry.
///
/// Drivers are reference counted so several spots can share one camera.
#[derive(Default, Clone)]
pub struct CameraRegistry {
    cameras: HashMap<String, Arc<dyn Camera>>,
}

impl CameraRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera driver. Any previously registered driver with the
    /// same `id` is replaced.
    pub fn register(&mut self, camera: Arc<dyn Camera>) {
        self.cameras.insert(camera.id().to_string(), camera);
    }

    /// Look up the driver for `camera_id`.
    ///
    /// # Errors
    ///
    /// [`SpotError::Configuration`] when no such camera is registered.
    pub fn resolve(&self, camera_id: &str) -> Result<Arc<dyn Camera>, SpotError> {
        self.cameras.get(camera_id).cloned().ok_or_else(|| {
            SpotError::Configuration(format!("camera '{camera_id}' is not registered"))
        })
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.cameras.contains_key(camera_id)
    }

    /// Registered camera ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.cameras.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for CameraRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraRegistry")
            .field("cameras", &self.ids())
            .finish()
    }
}
