//! Inbound service calls.
//!
//! A platform (or the REPL) triggers core operations by sending a flat JSON
//! object tagged with the service name:
//!
//! ```json
//! { "service": "snooze", "spot": "Work Desk", "duration_minutes": 60 }
//! ```
//!
//! `spot` may be either the display name or the spot id; both slugify to the
//! same id.

use serde::{Deserialize, Serialize};
use twinsync_types::{Cadence, SpotError, VoicePolicy, slugify};

/// Bounds for a timed snooze, in minutes (one minute to one day).
pub const MIN_SNOOZE_MINUTES: u32 = 1;
pub const MAX_SNOOZE_MINUTES: u32 = 1440;

/// One inbound action, mapped 1:1 onto a spot or supervisor operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum SpotAction {
    Check {
        spot: String,
    },
    Reset {
        spot: String,
    },
    /// `duration_minutes = None` snoozes until `unsnooze`.
    Snooze {
        spot: String,
        #[serde(default)]
        duration_minutes: Option<u32>,
    },
    Unsnooze {
        spot: String,
    },
    CheckAll,
    SetVoice {
        spot: String,
        voice: VoicePolicy,
    },
    SetCadence {
        spot: String,
        cadence: Cadence,
    },
    SetDefinition {
        spot: String,
        definition: String,
    },
}

impl SpotAction {
    /// Parse and validate a service call.
    ///
    /// # Errors
    ///
    /// [`SpotError::Configuration`] for malformed JSON, an unknown service,
    /// a blank spot, a snooze outside `1..=1440` minutes, or an invalid voice
    /// or cadence.
    pub fn from_service_call(json: &str) -> Result<SpotAction, SpotError> {
        let action: SpotAction = serde_json::from_str(json)
            .map_err(|e| SpotError::Configuration(format!("invalid service call: {e}")))?;
        action.validate()?;
        Ok(action)
    }

    pub fn validate(&self) -> Result<(), SpotError> {
        if self.spot().is_some_and(|spot| slugify(spot).is_empty()) {
            return Err(SpotError::Configuration(format!(
                "service '{}' needs a spot",
                self.service()
            )));
        }
        match self {
            SpotAction::Snooze {
                duration_minutes: Some(m),
                ..
            } if !(MIN_SNOOZE_MINUTES..=MAX_SNOOZE_MINUTES).contains(m) => {
                Err(SpotError::Configuration(format!(
                    "snooze duration must be between {MIN_SNOOZE_MINUTES} and {MAX_SNOOZE_MINUTES} minutes, got {m}"
                )))
            }
            SpotAction::SetVoice { voice, .. } => voice.validate(),
            SpotAction::SetCadence { cadence, .. } => cadence.validate(),
            _ => Ok(()),
        }
    }

    /// Service name as it appears in the `service` tag.
    pub fn service(&self) -> &'static str {
        match self {
            SpotAction::Check { .. } => "check",
            SpotAction::Reset { .. } => "reset",
            SpotAction::Snooze { .. } => "snooze",
            SpotAction::Unsnooze { .. } => "unsnooze",
            SpotAction::CheckAll => "check_all",
            SpotAction::SetVoice { .. } => "set_voice",
            SpotAction::SetCadence { .. } => "set_cadence",
            SpotAction::SetDefinition { .. } => "set_definition",
        }
    }

    /// Target spot as given by the caller; `None` for `check_all`.
    pub fn spot(&self) -> Option<&str> {
        match self {
            SpotAction::Check { spot }
            | SpotAction::Reset { spot }
            | SpotAction::Snooze { spot, .. }
            | SpotAction::Unsnooze { spot }
            | SpotAction::SetVoice { spot, .. }
            | SpotAction::SetCadence { spot, .. }
            | SpotAction::SetDefinition { spot, .. } => Some(spot),
            SpotAction::CheckAll => None,
        }
    }

    /// Target spot id (slug of [`spot`][Self::spot]).
    pub fn spot_id(&self) -> Option<String> {
        self.spot().map(slugify)
    }
}
