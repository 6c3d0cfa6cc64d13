//! `twinsync-hal` – where images come from.
//!
//! # Modules
//!
//! - [`camera`] – the [`Camera`][camera::Camera] trait and the
//!   [`ImageCapture`][camera::ImageCapture] it yields.
//! - [`snapshot`] – [`FileCamera`][snapshot::FileCamera] (reads a still that
//!   another process keeps fresh) and
//!   [`HttpSnapshotCamera`][snapshot::HttpSnapshotCamera] (fetches a JPEG/PNG
//!   snapshot URL).
//! - [`registry`] – [`CameraRegistry`][registry::CameraRegistry]: resolves the
//!   camera reference in a spot's configuration to a driver.

pub mod camera;
pub mod registry;
pub mod snapshot;

pub use camera::{Camera, ImageCapture};
pub use registry::CameraRegistry;
pub use snapshot::{FileCamera, HttpSnapshotCamera};
