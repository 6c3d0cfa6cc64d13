//! Spot configuration: identity, camera reference, starter templates and
//! check cadence.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::definition::Definition;
use crate::error::SpotError;
use crate::voice::VoicePolicy;

/// Shortest interval accepted for [`Cadence::EveryHours`].
pub const MIN_INTERVAL_HOURS: u32 = 1;
/// Longest interval accepted for [`Cadence::EveryHours`] (one week).
pub const MAX_INTERVAL_HOURS: u32 = 168;

/// Derive a stable spot identifier from its display name.
///
/// Lowercase ASCII alphanumerics are kept; every other run of characters
/// collapses into a single `_`.
///
/// ```rust
/// assert_eq!(twinsync_types::slugify("Work Desk #2"), "work_desk_2");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotType
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of place being tracked; selects a starter definition template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpotType {
    Work,
    Chill,
    Sleep,
    Kitchen,
    Entryway,
    Storage,
    #[default]
    Custom,
}

impl SpotType {
    pub const ALL: [SpotType; 7] = [
        SpotType::Work,
        SpotType::Chill,
        SpotType::Sleep,
        SpotType::Kitchen,
        SpotType::Entryway,
        SpotType::Storage,
        SpotType::Custom,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SpotType::Work => "Work / focus desk",
            SpotType::Chill => "Chill / relaxing area",
            SpotType::Sleep => "Sleep zone",
            SpotType::Kitchen => "Kitchen",
            SpotType::Entryway => "Entryway / hallway",
            SpotType::Storage => "Storage area",
            SpotType::Custom => "Something else",
        }
    }

    /// Starter definition offered when a spot of this type is created.
    pub fn template(&self) -> &'static str {
        match self {
            SpotType::Work => {
                "My work area. I need a clear surface to focus.\n\n\
                 Things that should be here:\n- Laptop\n- Notebook and pen\n- Water bottle\n\n\
                 Things that shouldn't be here:\n- Dishes or cups\n- Loose papers or mail\n- Clothes"
            }
            SpotType::Chill => {
                "Where I relax. Calm and uncluttered.\n\n\
                 Things that are fine here:\n- Remote controls\n- A book or two\n- Folded blanket\n\n\
                 Things that shouldn't pile up:\n- Empty glasses or plates\n- Pocket clutter\n- Laundry"
            }
            SpotType::Sleep => {
                "My sleep space, ready for rest.\n\n\
                 Ready state:\n- Bed made\n- Nightstand clear except lamp and charger\n\
                 - No clothes on floor"
            }
            SpotType::Kitchen => {
                "Kitchen counters ready to cook on.\n\n\
                 Ready state:\n- Counters wiped and clear\n- Sink empty\n\n\
                 Things that shouldn't be here:\n- Dirty dishes\n- Food left out"
            }
            SpotType::Entryway => {
                "First thing I see coming home.\n\n\
                 Ready state:\n- Shoes on the rack\n- Keys in the bowl\n- Coat hung up\n\n\
                 Things that shouldn't be here:\n- Bags dumped on the floor"
            }
            SpotType::Storage => {
                "A storage area where things stay organised.\n\n\
                 What belongs here:\n- [List your items]\n\n\
                 Signs it needs sorting:\n- Things outside their containers\n- Items blocking access"
            }
            SpotType::Custom => {
                "Describe this spot in your own words.\n\n\
                 What should it look like when ready?\n\n\
                 What are signs it needs attention?"
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cadence
// ─────────────────────────────────────────────────────────────────────────────

/// How often automatic checks fire.
///
/// In TOML: `cadence = "manual"`, `cadence = { times_per_day = 2 }` or
/// `cadence = { every_hours = 6 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// No automatic checks; only explicit `check` / `check_all`.
    #[default]
    Manual,
    /// Evenly spaced runs per day (1x, 2x, 4x daily presets).
    TimesPerDay(u32),
    /// Fixed interval, clamped to `[MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS]`.
    EveryHours(u32),
}

impl Cadence {
    /// Spacing between automatic checks, or `None` for manual-only spots.
    pub fn interval(&self) -> Option<Duration> {
        match *self {
            Cadence::Manual | Cadence::TimesPerDay(0) => None,
            Cadence::TimesPerDay(n) => Some(Duration::seconds(86_400 / i64::from(n))),
            Cadence::EveryHours(h) => Some(Duration::hours(i64::from(
                h.clamp(MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS),
            ))),
        }
    }

    /// # Errors
    ///
    /// [`SpotError::Configuration`] for `times_per_day = 0` or more than one
    /// run per minute.
    pub fn validate(&self) -> Result<(), SpotError> {
        match *self {
            Cadence::TimesPerDay(0) => Err(SpotError::Configuration(
                "times_per_day must be at least 1 (use \"manual\" to disable automatic checks)"
                    .to_string(),
            )),
            Cadence::TimesPerDay(n) if n > 1440 => Err(SpotError::Configuration(format!(
                "times_per_day = {n} is more than one check per minute"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Manual => write!(f, "manual"),
            Cadence::TimesPerDay(n) => write!(f, "{n}x daily"),
            Cadence::EveryHours(h) => write!(f, "every {h}h"),
        }
    }
}

impl FromStr for Cadence {
    type Err = SpotError;

    /// Accepts `manual`, `<n>x` (runs per day) and `<h>h` (interval hours).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let bad = || SpotError::Configuration(format!("unrecognised cadence '{s}'"));
        let cadence = if s == "manual" {
            Cadence::Manual
        } else if let Some(n) = s.strip_suffix('x') {
            Cadence::TimesPerDay(n.parse().map_err(|_| bad())?)
        } else if let Some(h) = s.strip_suffix('h') {
            Cadence::EveryHours(h.parse().map_err(|_| bad())?)
        } else {
            return Err(bad());
        };
        cadence.validate()?;
        Ok(cadence)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotConfig
// ─────────────────────────────────────────────────────────────────────────────

/// User-supplied configuration for one spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotConfig {
    /// Display name; the spot id is derived from it with [`slugify`].
    pub name: String,
    /// Identifier of a registered camera.
    pub camera: String,
    #[serde(default)]
    pub spot_type: SpotType,
    /// Free-text ready-state description.
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub voice: VoicePolicy,
    #[serde(default)]
    pub cadence: Cadence,
}

impl SpotConfig {
    pub fn id(&self) -> String {
        slugify(&self.name)
    }

    /// Validate everything that can be checked without external state and
    /// return the parsed definition.
    ///
    /// # Errors
    ///
    /// - [`SpotError::InvalidDefinition`] for an empty definition.
    /// - [`SpotError::Configuration`] for a missing name or camera, a bad
    ///   cadence, or an invalid custom voice template.
    pub fn validate(&self) -> Result<Definition, SpotError> {
        if self.id().is_empty() {
            return Err(SpotError::Configuration(format!(
                "spot name '{}' has no usable characters",
                self.name
            )));
        }
        if self.camera.trim().is_empty() {
            return Err(SpotError::Configuration(format!(
                "spot '{}' has no camera configured",
                self.name
            )));
        }
        self.cadence.validate()?;
        self.voice.validate()?;
        Definition::parse(&self.definition)
    }
}

/// Voice and cadence changed at runtime, layered over the config file.
///
/// `configured` holds the config values the spot was last opened with. An
/// override survives a restart only while the config file keeps the value it
/// replaced; editing that field in the file makes the file win again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpotOverrides {
    #[serde(default)]
    pub configured: Option<SpotConfig>,
    #[serde(default)]
    pub voice: Option<VoicePolicy>,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

impl SpotOverrides {
    /// Whether `config` carries the same definition text as the last open.
    pub fn definition_unchanged(&self, config: &SpotConfig) -> bool {
        self.configured
            .as_ref()
            .is_some_and(|c| c.definition == config.definition)
    }

    /// Re-base on a freshly loaded `config` and return the effective config.
    pub fn rebase(&mut self, config: &SpotConfig) -> SpotConfig {
        let previous = self.configured.replace(config.clone());
        if previous.as_ref().is_none_or(|p| p.voice != config.voice) {
            self.voice = None;
        }
        if previous.as_ref().is_none_or(|p| p.cadence != config.cadence) {
            self.cadence = None;
        }
        let mut effective = config.clone();
        if let Some(voice) = &self.voice {
            effective.voice = voice.clone();
        }
        if let Some(cadence) = self.cadence {
            effective.cadence = cadence;
        }
        effective
    }
}
