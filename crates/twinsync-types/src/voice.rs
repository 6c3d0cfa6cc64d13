//! Voice policies and the reports they render.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpotError;

/// Named substitution points accepted by [`VoicePolicy::Custom`] templates.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &[
    "spot",
    "to_sort_count",
    "looking_good_count",
    "to_sort",
    "looking_good",
    "streak",
    "best_streak",
    "top_item",
    "top_item_count",
    "hardest_day",
    "notes",
];

/// Presentation policy selecting which facts a report includes and how they
/// are phrased.
///
/// In TOML: `voice = "direct"` or `voice = { custom = "{to_sort_count} left" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoicePolicy {
    /// Facts only.
    Direct,
    /// Facts plus acknowledgement of effort.
    #[default]
    Supportive,
    /// Facts plus pattern statistics.
    Analytical,
    /// The to-sort / looking-good lists only.
    Minimal,
    /// Facts with softened phrasing after consecutive unsorted days.
    #[serde(alias = "gentle_nudge")]
    Gentle,
    /// Facts plus a user template with `{placeholder}` substitution points.
    Custom(String),
}

impl VoicePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            VoicePolicy::Direct => "direct",
            VoicePolicy::Supportive => "supportive",
            VoicePolicy::Analytical => "analytical",
            VoicePolicy::Minimal => "minimal",
            VoicePolicy::Gentle => "gentle",
            VoicePolicy::Custom(_) => "custom",
        }
    }

    /// # Errors
    ///
    /// [`SpotError::Configuration`] when a custom template is blank or names
    /// a placeholder outside [`TEMPLATE_PLACEHOLDERS`].
    pub fn validate(&self) -> Result<(), SpotError> {
        let VoicePolicy::Custom(template) = self else {
            return Ok(());
        };
        if template.trim().is_empty() {
            return Err(SpotError::Configuration(
                "custom voice requires a non-empty template".to_string(),
            ));
        }
        if let Some(unknown) = placeholders(template)
            .into_iter()
            .find(|p| !TEMPLATE_PLACEHOLDERS.contains(p))
        {
            return Err(SpotError::Configuration(format!(
                "unknown placeholder '{{{unknown}}}' in custom voice template"
            )));
        }
        Ok(())
    }
}

/// Names between `{` and `}` in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                found.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    found
}

impl fmt::Display for VoicePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VoicePolicy {
    type Err = SpotError;

    /// Accepts the fixed policy names, or `custom:<template>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(template) = trimmed.strip_prefix("custom:") {
            let voice = VoicePolicy::Custom(template.trim().to_string());
            voice.validate()?;
            return Ok(voice);
        }
        match trimmed.to_lowercase().as_str() {
            "direct" => Ok(VoicePolicy::Direct),
            "supportive" => Ok(VoicePolicy::Supportive),
            "analytical" => Ok(VoicePolicy::Analytical),
            "minimal" => Ok(VoicePolicy::Minimal),
            "gentle" | "gentle_nudge" => Ok(VoicePolicy::Gentle),
            other => Err(SpotError::Configuration(format!("unknown voice '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RenderedReport
// ─────────────────────────────────────────────────────────────────────────────

/// One line of a rendered item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// Windowed occurrence count, present only for recurring offenders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_count: Option<u32>,
}

impl fmt::Display for ReportItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.phrase)?;
        if let Some(q) = &self.qualifier {
            write!(f, " ({q})")?;
        }
        if let Some(n) = self.recurring_count {
            write!(f, " [seen {n}x recently]")?;
        }
        Ok(())
    }
}

/// Output of the report composer for one check under one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub spot_id: String,
    pub check_id: Uuid,
    pub voice: String,
    pub headline: String,
    pub to_sort: Vec<ReportItem>,
    pub looking_good: Vec<ReportItem>,
    /// Narrative sentences; empty for the minimal voice.
    pub narrative: Vec<String>,
}

impl RenderedReport {
    /// Plain-text rendering for terminals and text sensors.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.headline);
        out.push('\n');
        if !self.to_sort.is_empty() {
            out.push_str("To sort:\n");
            for item in &self.to_sort {
                out.push_str(&format!("  - {item}\n"));
            }
        }
        if !self.looking_good.is_empty() {
            out.push_str("Looking good:\n");
            for item in &self.looking_good {
                out.push_str(&format!("  - {item}\n"));
            }
        }
        for line in &self.narrative {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Narrative joined into a single note.
    pub fn notes(&self) -> String {
        self.narrative.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_extracted_in_order() {
        assert_eq!(
            placeholders("{spot}: {to_sort_count} left, streak {streak}"),
            ["spot", "to_sort_count", "streak"]
        );
        assert!(placeholders("no braces").is_empty());
        assert_eq!(placeholders("dangling {spot"), Vec::<&str>::new());
    }

    #[test]
    fn custom_template_validation() {
        assert!(VoicePolicy::Custom("{to_sort_count} to go".into()).validate().is_ok());
        assert!(VoicePolicy::Custom("  ".into()).validate().is_err());
        let err = VoicePolicy::Custom("{mood}".into()).validate().unwrap_err();
        assert!(err.to_string().contains("mood"));
    }

    #[test]
    fn voice_from_str() {
        assert_eq!("Direct".parse::<VoicePolicy>().unwrap(), VoicePolicy::Direct);
        assert_eq!("gentle_nudge".parse::<VoicePolicy>().unwrap(), VoicePolicy::Gentle);
        assert_eq!(
            "custom: {streak} days".parse::<VoicePolicy>().unwrap(),
            VoicePolicy::Custom("{streak} days".into())
        );
        assert!("sarcastic".parse::<VoicePolicy>().is_err());
    }

    #[test]
    fn voice_serde_forms() {
        let v: VoicePolicy = serde_json::from_str(r#""analytical""#).unwrap();
        assert_eq!(v, VoicePolicy::Analytical);
        let v: VoicePolicy = serde_json::from_str(r#""gentle_nudge""#).unwrap();
        assert_eq!(v, VoicePolicy::Gentle);
        let v: VoicePolicy = serde_json::from_str(r#"{"custom":"{spot}"}"#).unwrap();
        assert_eq!(v, VoicePolicy::Custom("{spot}".into()));
    }

    #[test]
    fn report_text_lists_items() {
        let report = RenderedReport {
            spot_id: "desk".into(),
            check_id: Uuid::new_v4(),
            voice: "direct".into(),
            headline: "Desk: 1 to sort".into(),
            to_sort: vec![ReportItem {
                phrase: "coffee mug".into(),
                qualifier: Some("left side".into()),
                recurring_count: Some(4),
            }],
            looking_good: vec![],
            narrative: vec!["Coffee mug is back.".into()],
        };
        let text = report.to_text();
        assert!(text.contains("coffee mug (left side) [seen 4x recently]"));
        assert!(text.ends_with("Coffee mug is back.\n"));
    }
}
