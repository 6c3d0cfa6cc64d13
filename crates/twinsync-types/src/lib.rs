//! `twinsync-types` – shared data model for TwinSync Spot.
//!
//! Every other crate in the workspace speaks in terms of these types:
//!
//! - [`spot`] – [`SpotConfig`], [`SpotType`] starter templates and the
//!   [`Cadence`] of automatic checks.
//! - [`definition`] – the user's free-text [`Definition`] of a spot's ready
//!   state, with structured expected/excluded hints.
//! - [`check`] – classifier verdicts, tagged [`Item`]s and the immutable
//!   [`CheckResult`] produced once per completed check.
//! - [`state`] – per-spot [`StreakState`] and [`SnoozeState`].
//! - [`voice`] – [`VoicePolicy`] presentation policies and the
//!   [`RenderedReport`] they produce.
//! - [`event`] – the [`Event`] envelope routed over the middleware bus.
//! - [`error`] – the [`SpotError`] / [`ClassifierError`] taxonomy.

pub mod check;
pub mod definition;
pub mod error;
pub mod event;
pub mod spot;
pub mod state;
pub mod voice;

pub use check::{
    CheckResult, CheckTrigger, ClassifierVerdict, Item, ItemStatus, VerdictItem, normalize_phrase,
};
pub use definition::Definition;
pub use error::{ClassifierError, SpotError};
pub use event::{Event, EventPayload};
pub use spot::{Cadence, SpotConfig, SpotOverrides, SpotType, slugify};
pub use state::{SnoozeState, StreakPhase, StreakState};
pub use voice::{RenderedReport, ReportItem, TEMPLATE_PLACEHOLDERS, VoicePolicy};
