//! Comparator – structural reconciliation of a classifier verdict.
//!
//! The classifier has already decided, per item, whether it matches the
//! definition. The comparator only partitions, preserves the notes verbatim
//! and computes `is_sorted`. It never synthesises a result from a broken
//! verdict: a blank phrase makes the whole verdict malformed.

use chrono::{DateTime, Utc};
use tracing::debug;
use twinsync_types::{
    CheckResult, CheckTrigger, ClassifierError, ClassifierVerdict, Definition, Item, ItemStatus,
    SpotError,
};
use uuid::Uuid;

/// Who the check is for and when it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckContext {
    pub spot_id: String,
    pub trigger: CheckTrigger,
    pub completed_at: DateTime<Utc>,
}

/// Reconcile `verdict` against `definition` into an immutable [`CheckResult`].
///
/// An empty verdict is a sorted check: nothing wrong was detected.
///
/// # Errors
///
/// [`SpotError::Classifier`] with [`ClassifierError::Malformed`] when an item
/// carries an empty phrase.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use twinsync_kernel::{CheckContext, reconcile};
/// use twinsync_types::{CheckTrigger, ClassifierVerdict, Definition};
///
/// let def = Definition::parse("Expected: laptop").unwrap();
/// let ctx = CheckContext {
///     spot_id: "desk".into(),
///     trigger: CheckTrigger::Manual,
///     completed_at: Utc::now(),
/// };
/// let result = reconcile(&def, ClassifierVerdict::default(), ctx).unwrap();
/// assert!(result.is_sorted);
/// ```
pub fn reconcile(
    definition: &Definition,
    verdict: ClassifierVerdict,
    ctx: CheckContext,
) -> Result<CheckResult, SpotError> {
    let mut items = Vec::with_capacity(verdict.items.len());
    for (idx, v) in verdict.items.into_iter().enumerate() {
        let phrase = v.phrase.trim();
        if phrase.is_empty() {
            return Err(ClassifierError::Malformed(format!("item {idx} has an empty phrase")).into());
        }
        let qualifier = v
            .qualifier
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        items.push(Item {
            phrase: phrase.to_string(),
            qualifier,
            status: if v.matches_definition {
                ItemStatus::Matched
            } else {
                ItemStatus::ToSort
            },
        });
    }

    let is_sorted = items.iter().all(|i| i.status == ItemStatus::Matched);
    debug!(
        spot = %ctx.spot_id,
        items = items.len(),
        is_sorted,
        "verdict reconciled"
    );
    Ok(CheckResult {
        id: Uuid::new_v4(),
        spot_id: ctx.spot_id,
        definition_id: definition.id,
        timestamp: ctx.completed_at,
        trigger: ctx.trigger,
        items,
        notes: verdict.notes,
        is_sorted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_types::VerdictItem;

    fn ctx() -> CheckContext {
        CheckContext {
            spot_id: "desk".into(),
            trigger: CheckTrigger::Automatic,
            completed_at: Utc::now(),
        }
    }

    fn item(phrase: &str, matches: bool) -> VerdictItem {
        VerdictItem {
            phrase: phrase.into(),
            qualifier: None,
            matches_definition: matches,
        }
    }

    fn definition() -> Definition {
        Definition::parse("Expected: laptop, notebook, water bottle\nNot here: dishes, papers").unwrap()
    }

    #[test]
    fn desk_scenario_partitions_items() {
        let verdict = ClassifierVerdict {
            items: vec![
                item("coffee mug", false),
                item("papers", false),
                item("laptop", true),
            ],
            notes: "Mug next to the keyboard.".into(),
        };
        let def = definition();
        let result = reconcile(&def, verdict, ctx()).unwrap();

        let to_sort: Vec<_> = result.to_sort().map(|i| i.phrase.as_str()).collect();
        let good: Vec<_> = result.looking_good().map(|i| i.phrase.as_str()).collect();
        assert_eq!(to_sort, ["coffee mug", "papers"]);
        assert_eq!(good, ["laptop"]);
        assert!(!result.is_sorted);
        assert_eq!(result.notes, "Mug next to the keyboard.");
        assert_eq!(result.definition_id, def.id);
    }

    #[test]
    fn every_item_lands_in_exactly_one_list() {
        let verdict = ClassifierVerdict {
            items: (0..10).map(|i| item(&format!("thing {i}"), i % 3 == 0)).collect(),
            notes: String::new(),
        };
        let result = reconcile(&definition(), verdict, ctx()).unwrap();
        assert_eq!(result.to_sort_count() + result.looking_good_count(), 10);
        assert_eq!(result.is_sorted, result.to_sort_count() == 0);
    }

    #[test]
    fn empty_verdict_is_sorted() {
        let result = reconcile(&definition(), ClassifierVerdict::default(), ctx()).unwrap();
        assert!(result.is_sorted);
        assert!(result.items.is_empty());
    }

    #[test]
    fn all_matched_is_sorted() {
        let verdict = ClassifierVerdict {
            items: vec![item("laptop", true), item("notebook", true)],
            notes: String::new(),
        };
        assert!(reconcile(&definition(), verdict, ctx()).unwrap().is_sorted);
    }

    #[test]
    fn blank_phrase_is_malformed() {
        let verdict = ClassifierVerdict {
            items: vec![item("laptop", true), item("   ", false)],
            notes: String::new(),
        };
        let err = reconcile(&definition(), verdict, ctx()).unwrap_err();
        assert!(matches!(err, SpotError::Classifier(ClassifierError::Malformed(_))));
    }

    #[test]
    fn qualifiers_are_trimmed_and_blank_ones_dropped() {
        let verdict = ClassifierVerdict {
            items: vec![
                VerdictItem {
                    phrase: " coffee mug ".into(),
                    qualifier: Some(" left side of desk ".into()),
                    matches_definition: false,
                },
                VerdictItem {
                    phrase: "papers".into(),
                    qualifier: Some("  ".into()),
                    matches_definition: false,
                },
            ],
            notes: String::new(),
        };
        let result = reconcile(&definition(), verdict, ctx()).unwrap();
        assert_eq!(result.items[0].phrase, "coffee mug");
        assert_eq!(result.items[0].qualifier.as_deref(), Some("left side of desk"));
        assert_eq!(result.items[1].qualifier, None);
    }
}
