//! The user's description of a spot's ready state.
//!
//! The free text is the source of truth and is what the classifier sees. The
//! structured `expected` / `excluded` lists are thin hints derived from it:
//! bullet lines are collected under the most recent heading, and a heading
//! that reads like a prohibition ("Things that shouldn't be here:") switches
//! collection to the excluded list. No semantic matching happens here.
//!
//! ```rust
//! use twinsync_types::Definition;
//!
//! let def = Definition::parse(
//!     "Expected: laptop, notebook, water bottle\nNot here: dishes, papers",
//! ).unwrap();
//! assert_eq!(def.expected, ["laptop", "notebook", "water bottle"]);
//! assert_eq!(def.excluded, ["dishes", "papers"]);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::check::normalize_phrase;
use crate::error::SpotError;

/// Heading fragments that mark a list of things that must not be present.
const EXCLUSION_MARKERS: &[&str] = &[
    "shouldn't",
    "should not",
    "not be here",
    "not here",
    "don't",
    "do not",
    "signs",
    "pile up",
    "not allowed",
    "avoid",
    "excluded",
    "never",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Expected,
    Excluded,
}

/// Immutable snapshot of a spot's ready-state description.
///
/// Editing a definition creates a new snapshot with a new `id`; past check
/// results keep pointing at the snapshot they ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: Uuid,
    /// Free-text description exactly as the user wrote it.
    pub text: String,
    /// Expected-item phrases, in the user's order.
    pub expected: Vec<String>,
    /// Excluded-item phrases, in the user's order.
    pub excluded: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Definition {
    /// Parse `text` into a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SpotError::InvalidDefinition`] when the text carries no
    /// content at all (empty, whitespace or punctuation only).
    pub fn parse(text: &str) -> Result<Self, SpotError> {
        Self::restore(Uuid::new_v4(), text, Utc::now())
    }

    /// Rebuild a snapshot with a known identity (e.g. loaded from storage).
    pub fn restore(id: Uuid, text: &str, created_at: DateTime<Utc>) -> Result<Self, SpotError> {
        if !text.chars().any(char::is_alphanumeric) {
            return Err(SpotError::InvalidDefinition(
                "definition is empty; describe what the spot should look like".to_string(),
            ));
        }
        let (expected, excluded) = extract_hints(text);
        Ok(Self {
            id,
            text: text.to_string(),
            expected,
            excluded,
            created_at,
        })
    }

    /// `true` when `text` differs from this snapshot's text, ignoring
    /// leading/trailing whitespace.
    pub fn differs_from(&self, text: &str) -> bool {
        self.text.trim() != text.trim()
    }
}

fn extract_hints(text: &str) -> (Vec<String>, Vec<String>) {
    let mut expected = Vec::new();
    let mut excluded = Vec::new();
    let mut section = Section::Expected;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match strip_bullet(line) {
            Some(body) => {
                if body.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("no ")) {
                    // "No clothes on floor" under any heading is a prohibition.
                    push_phrases(&mut excluded, &body[3..]);
                } else {
                    let target = match section {
                        Section::Expected => &mut expected,
                        Section::Excluded => &mut excluded,
                    };
                    push_phrases(target, body);
                }
            }
            None => {
                if let Some((heading, rest)) = line.split_once(':') {
                    section = classify_heading(heading);
                    let target = match section {
                        Section::Expected => &mut expected,
                        Section::Excluded => &mut excluded,
                    };
                    push_phrases(target, rest);
                }
                // Plain prose carries no list structure.
            }
        }
    }
    (expected, excluded)
}

fn classify_heading(heading: &str) -> Section {
    let lowered = heading.to_lowercase();
    if EXCLUSION_MARKERS.iter().any(|m| lowered.contains(m)) {
        Section::Excluded
    } else {
        Section::Expected
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered lists: "1. laptop" / "2) notebook"
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(body) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(body.trim());
        }
    }
    None
}

fn push_phrases(target: &mut Vec<String>, list: &str) {
    for part in list.split([',', ';']) {
        let phrase = part.trim().trim_end_matches('.').trim();
        if phrase.is_empty() || phrase.starts_with('[') {
            continue;
        }
        let key = normalize_phrase(phrase);
        if !target.iter().any(|p| normalize_phrase(p) == key) {
            target.push(phrase.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_definition_is_rejected() {
        for text in ["", "   ", "\n\n", "- \n* \n:"] {
            let err = Definition::parse(text).unwrap_err();
            assert!(matches!(err, SpotError::InvalidDefinition(_)), "{text:?}");
        }
    }

    #[test]
    fn inline_lists_split_into_sections() {
        let def = Definition::parse(
            "Expected: laptop, notebook, water bottle\nNot here: dishes, papers",
        )
        .unwrap();
        assert_eq!(def.expected, ["laptop", "notebook", "water bottle"]);
        assert_eq!(def.excluded, ["dishes", "papers"]);
    }

    #[test]
    fn bullet_lists_follow_headings() {
        let text = "This is my work area. I need a clear surface to focus.

Things that should be here:
- Laptop/monitor
- Notebook and pen
- Water bottle

Things that shouldn't be here:
- Dirty dishes or cups
- Random papers or mail";
        let def = Definition::parse(text).unwrap();
        assert_eq!(def.expected, ["Laptop/monitor", "Notebook and pen", "Water bottle"]);
        assert_eq!(def.excluded, ["Dirty dishes or cups", "Random papers or mail"]);
        assert_eq!(def.text, text);
    }

    #[test]
    fn no_prefixed_bullets_are_exclusions() {
        let def = Definition::parse(
            "Ready state:\n- Bed made\n- No clothes on floor\n1. Blinds open",
        )
        .unwrap();
        assert_eq!(def.expected, ["Bed made", "Blinds open"]);
        assert_eq!(def.excluded, ["clothes on floor"]);
    }

    #[test]
    fn prose_only_definition_is_valid_without_hints() {
        let def = Definition::parse("Keep the counter clear and wiped").unwrap();
        assert!(def.expected.is_empty());
        assert!(def.excluded.is_empty());
    }

    #[test]
    fn duplicate_phrases_are_kept_once_in_order() {
        let def = Definition::parse("Expected: Laptop, laptop , notebook").unwrap();
        assert_eq!(def.expected, ["Laptop", "notebook"]);
    }

    #[test]
    fn placeholder_bullets_are_ignored() {
        let def = Definition::parse("What belongs here:\n- [List your items]\n- boxes").unwrap();
        assert_eq!(def.expected, ["boxes"]);
    }

    #[test]
    fn restore_keeps_identity() {
        let id = Uuid::new_v4();
        let at = Utc::now();
        let def = Definition::restore(id, "Expected: lamp", at).unwrap();
        assert_eq!(def.id, id);
        assert_eq!(def.created_at, at);
        assert!(!def.differs_from("  Expected: lamp\n"));
        assert!(def.differs_from("Expected: lamp, book"));
    }
}
