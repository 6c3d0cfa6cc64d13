//! The Observation Adapter seam.
//!
//! TwinSync never decides by itself whether an item belongs in a spot. It
//! hands a fresh capture plus the spot's [`Definition`] to an adapter and
//! gets back a [`ClassifierVerdict`]; the rule engine takes over from there.
//!
//! - [`ObservationAdapter`] – the trait every classifier must implement.
//! - [`VisionDriver`][crate::vision_driver::VisionDriver] – an OpenAI-compatible
//!   vision model over HTTP.

use async_trait::async_trait;
use twinsync_hal::ImageCapture;
use twinsync_types::{ClassifierError, ClassifierVerdict, Definition};

/// A classifier that turns one image into a structured verdict.
///
/// # Contract
///
/// * Stateless with respect to spot history: the adapter sees the current
///   capture and definition only, never past results.
/// * Every item it reports carries `matches_definition`; the adapter makes the
///   semantic decision, the comparator only sorts the items into lists.
#[async_trait]
pub trait ObservationAdapter: Send + Sync {
    async fn evaluate(
        &self,
        capture: &ImageCapture,
        definition: &Definition,
    ) -> Result<ClassifierVerdict, ClassifierError>;
}
