//! Classifier verdicts, tagged items and check results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpotError;

/// Canonicalise a phrase for recurrence counting.
///
/// Lowercases and collapses every run of whitespace into a single space.
/// Nothing else is merged: `"coffee mug"` and `"coffee mug on left side"`
/// remain distinct keys.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Classifier verdict (Observation Adapter contract)
// ─────────────────────────────────────────────────────────────────────────────

/// One item reported by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VerdictItem {
    /// Specific name of the thing seen, e.g. `"coffee mug"`.
    pub phrase: String,
    /// Optional free-text qualifier, e.g. `"left side of desk"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// `true` when the item matches something the definition expects.
    pub matches_definition: bool,
}

/// The full classifier verdict for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifierVerdict {
    pub items: Vec<VerdictItem>,
    /// Free-text observation, preserved verbatim in the check result.
    #[serde(default)]
    pub notes: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Item
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of an item within one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Matched,
    ToSort,
}

/// A single detected thing, tagged for one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Phrase as reported by the classifier (display form).
    pub phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub status: ItemStatus,
}

impl Item {
    /// Recurrence key: the normalised phrase.
    pub fn key(&self) -> String {
        normalize_phrase(&self.phrase)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CheckTrigger
// ─────────────────────────────────────────────────────────────────────────────

/// What initiated a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTrigger {
    /// Fired by the spot's cadence timer; suppressed while snoozed.
    Automatic,
    /// Explicit `check` action.
    Manual,
    /// Part of a `check_all` sweep.
    CheckAll,
}

impl CheckTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckTrigger::Automatic => "automatic",
            CheckTrigger::Manual => "manual",
            CheckTrigger::CheckAll => "check_all",
        }
    }
}

impl FromStr for CheckTrigger {
    type Err = SpotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(CheckTrigger::Automatic),
            "manual" => Ok(CheckTrigger::Manual),
            "check_all" => Ok(CheckTrigger::CheckAll),
            _ => Err(SpotError::Configuration(format!("unknown check trigger '{s}'"))),
        }
    }
}

impl fmt::Display for CheckTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CheckResult
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable outcome of one completed check.
///
/// Created exactly once per completed check and appended to the spot's
/// history; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Uuid,
    pub spot_id: String,
    /// Snapshot of the [`Definition`][crate::Definition] the check ran against.
    pub definition_id: Uuid,
    /// Completion time of the check.
    pub timestamp: DateTime<Utc>,
    pub trigger: CheckTrigger,
    /// Every reported item, in classifier order, tagged matched / to-sort.
    pub items: Vec<Item>,
    pub notes: String,
    /// `true` iff no item is tagged [`ItemStatus::ToSort`].
    pub is_sorted: bool,
}

impl CheckResult {
    /// Items that do not match the definition.
    pub fn to_sort(&self) -> impl Iterator<Item = &Item> + '_ {
        self.items.iter().filter(|i| i.status == ItemStatus::ToSort)
    }

    /// Items that match the definition.
    pub fn looking_good(&self) -> impl Iterator<Item = &Item> + '_ {
        self.items.iter().filter(|i| i.status == ItemStatus::Matched)
    }

    pub fn to_sort_count(&self) -> usize {
        self.to_sort().count()
    }

    pub fn looking_good_count(&self) -> usize {
        self.looking_good().count()
    }
}
