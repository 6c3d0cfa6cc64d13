//! `twinsync-middleware` – the plumbing between spots and the outside world.
//!
//! Routes events without caring what they mean, and translates between the
//! engine's types and the flat shapes a home-automation platform expects.
//!
//! # Modules
//!
//! - [`bus`] – headless, topic-based publish/subscribe event bus built on
//!   Tokio broadcast channels.
//! - [`surface`] – [`EntitySurface`][surface::EntitySurface]: folds bus events
//!   into the externally visible per-spot and system-wide entity state.
//! - [`action`] – [`SpotAction`][action::SpotAction]: inbound service calls
//!   (`check`, `reset`, `snooze`, …) parsed from JSON.

pub mod action;
pub mod bus;
pub mod surface;

pub use action::SpotAction;
pub use bus::{BusError, EventBus, Topic, TopicReceiver};
pub use surface::{EntitySurface, SpotEntities, SystemEntities};
