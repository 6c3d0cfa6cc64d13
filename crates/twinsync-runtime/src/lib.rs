//! `twinsync-runtime` – the check engine.
//!
//! Wires the rule engine (`twinsync-kernel`), memory (`twinsync-memory`),
//! cameras (`twinsync-hal`) and the event bus (`twinsync-middleware`) into
//! running spots.
//!
//! # Modules
//!
//! - [`observation`] – [`ObservationAdapter`][observation::ObservationAdapter]:
//!   the seam to the vision classifier.
//! - [`vision_driver`] – [`VisionDriver`][vision_driver::VisionDriver]: an
//!   OpenAI-compatible vision client. The
//!   [`ClassifierVerdict`][twinsync_types::ClassifierVerdict] JSON Schema is
//!   injected via `response_format`, and requests are rate limited.
//! - [`report`] – [`compose`][report::compose]: the pure Report Composer.
//! - [`spot`] – [`Spot`][spot::Spot]: one spot's check pipeline and state.
//! - [`supervisor`] – [`SpotSupervisor`][supervisor::SpotSupervisor]: owns all
//!   spots, runs one control loop per spot and dispatches inbound actions.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP export.

pub mod observation;
pub mod report;
pub mod spot;
pub mod supervisor;
pub mod telemetry;
pub mod vision_driver;

pub use observation::ObservationAdapter;
pub use report::compose;
pub use spot::{Spot, SpotContext, SpotSettings, SpotSnapshot};
pub use supervisor::{ActionOutcome, SpotSupervisor};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use vision_driver::{VisionDriver, VisionDriverConfig};
