//! Platform entity surface.
//!
//! Folds bus [`Event`]s into the flat, externally visible state a
//! home-automation platform exposes per spot: a binary "sorted" sensor,
//! counters, list attributes, a short notes string and scheduling info.
//! It only projects facts carried by events; it never derives new ones.
//!
//! | entity                 | source event                                |
//! |------------------------|---------------------------------------------|
//! | `sorted`               | `CheckCompleted`, `StreakUpdated`           |
//! | `needs_attention`      | `!sorted`, forced `false` while snoozed     |
//! | `snoozed` / `snooze_until` | `SnoozeChanged`                         |
//! | `to_sort_*` / `looking_good_*` | `CheckCompleted`                    |
//! | `notes`                | `CheckCompleted` (classifier notes), then `ReportRendered` |
//! | `streak` / `best_streak` | `StreakUpdated`                           |
//! | `last_check`           | `CheckCompleted`                            |
//! | `last_error`           | `CheckFailed` (cleared by `CheckCompleted`) |
//! | `next_scheduled_check` | `ScheduleUpdated`                           |
//! | `overdue`              | `last_check` older than the overdue threshold |

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use twinsync_types::{Event, EventPayload, SnoozeState};

/// Platform limit for a text sensor state.
pub const MAX_STATE_CHARS: usize = 255;

/// Default age after which a spot is flagged overdue.
pub const DEFAULT_OVERDUE_HOURS: i64 = 48;

/// Note shown after a failed check.
pub const CHECK_FAILED_NOTE: &str = "check failed, will retry at next cadence";

/// Truncate to at most [`MAX_STATE_CHARS`] characters.
pub fn truncate_state(text: &str) -> String {
    text.chars().take(MAX_STATE_CHARS).collect()
}

/// Externally visible state of one spot at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotEntities {
    pub spot_id: String,
    pub name: String,
    pub sorted: bool,
    pub needs_attention: bool,
    pub snoozed: bool,
    pub snooze_until: Option<DateTime<Utc>>,
    pub to_sort_count: usize,
    pub to_sort_items: Vec<String>,
    pub looking_good_count: usize,
    pub looking_good_items: Vec<String>,
    pub notes: String,
    pub streak: u32,
    pub best_streak: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_scheduled_check: Option<DateTime<Utc>>,
    pub overdue: bool,
}

/// Aggregate state across every spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEntities {
    pub spot_count: usize,
    pub spots_needing_attention: usize,
    pub all_sorted: bool,
    /// Earliest upcoming automatic check across all spots.
    pub next_scheduled_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct SpotRecord {
    name: String,
    sorted: bool,
    snooze: Option<SnoozeState>,
    to_sort: Vec<String>,
    looking_good: Vec<String>,
    notes: String,
    streak: u32,
    best_streak: u32,
    last_check: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_scheduled_check: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EntitySurface
// ─────────────────────────────────────────────────────────────────────────────

/// Event-sourced projection of all spots' entity state.
#[derive(Debug, Clone)]
pub struct EntitySurface {
    spots: BTreeMap<String, SpotRecord>,
    overdue_after: Duration,
}

impl Default for EntitySurface {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_OVERDUE_HOURS))
    }
}

impl EntitySurface {
    pub fn new(overdue_after: Duration) -> Self {
        Self {
            spots: BTreeMap::new(),
            overdue_after,
        }
    }

    /// Make a spot visible before its first event, with a display name.
    pub fn register(&mut self, spot_id: &str, name: &str) {
        self.spots.entry(spot_id.to_string()).or_default().name = name.to_string();
    }

    fn record(&mut self, spot_id: &str) -> &mut SpotRecord {
        self.spots.entry(spot_id.to_string()).or_insert_with(|| SpotRecord {
            name: spot_id.to_string(),
            ..SpotRecord::default()
        })
    }

    /// Fold one event into the projection.
    pub fn apply(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::CheckCompleted(result) => {
                let rec = self.record(&result.spot_id);
                rec.sorted = result.is_sorted;
                rec.to_sort = result.to_sort().map(|i| i.phrase.clone()).collect();
                rec.looking_good = result.looking_good().map(|i| i.phrase.clone()).collect();
                rec.notes = truncate_state(&result.notes);
                rec.last_check = Some(result.timestamp);
                rec.last_error = None;
            }
            EventPayload::CheckFailed { spot_id, error, .. } => {
                self.record(spot_id).last_error = Some(truncate_state(&format!(
                    "{CHECK_FAILED_NOTE} ({error})"
                )));
            }
            EventPayload::ReportRendered(report) => {
                let notes = report.notes();
                if !notes.is_empty() {
                    self.record(&report.spot_id).notes = truncate_state(&notes);
                }
            }
            EventPayload::StreakUpdated { spot_id, streak } => {
                let rec = self.record(spot_id);
                rec.sorted = streak.is_sorted();
                rec.streak = streak.current;
                rec.best_streak = streak.best;
            }
            EventPayload::SnoozeChanged { spot_id, snooze } => {
                self.record(spot_id).snooze = *snooze;
            }
            EventPayload::ScheduleUpdated { spot_id, next_check } => {
                self.record(spot_id).next_scheduled_check = *next_check;
            }
            EventPayload::SpotRemoved { spot_id } => {
                self.spots.remove(spot_id);
                debug!(spot = %spot_id, "spot removed from entity surface");
            }
        }
    }

    /// Entity state of `spot_id` as of `now`.
    pub fn spot_entities(&self, spot_id: &str, now: DateTime<Utc>) -> Option<SpotEntities> {
        let rec = self.spots.get(spot_id)?;
        let snoozed = rec.snooze.is_some_and(|s| s.is_active(now));
        Some(SpotEntities {
            spot_id: spot_id.to_string(),
            name: rec.name.clone(),
            sorted: rec.sorted,
            needs_attention: !rec.sorted && !snoozed,
            snoozed,
            snooze_until: if snoozed { rec.snooze.and_then(|s| s.until) } else { None },
            to_sort_count: rec.to_sort.len(),
            to_sort_items: rec.to_sort.clone(),
            looking_good_count: rec.looking_good.len(),
            looking_good_items: rec.looking_good.clone(),
            notes: rec.notes.clone(),
            streak: rec.streak,
            best_streak: rec.best_streak,
            last_check: rec.last_check,
            last_error: rec.last_error.clone(),
            next_scheduled_check: rec.next_scheduled_check,
            overdue: rec.last_check.is_some_and(|t| now - t > self.overdue_after),
        })
    }

    /// Every spot's entity state, ordered by spot id.
    pub fn all_spots(&self, now: DateTime<Utc>) -> Vec<SpotEntities> {
        self.spots
            .keys()
            .filter_map(|id| self.spot_entities(id, now))
            .collect()
    }

    pub fn system_entities(&self, now: DateTime<Utc>) -> SystemEntities {
        let spots = self.all_spots(now);
        SystemEntities {
            spot_count: spots.len(),
            spots_needing_attention: spots.iter().filter(|s| s.needs_attention).count(),
            all_sorted: !spots.is_empty() && spots.iter().all(|s| s.sorted),
            next_scheduled_check: spots.iter().filter_map(|s| s.next_scheduled_check).min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_types::{
        CheckResult, CheckTrigger, Item, ItemStatus, RenderedReport, SpotError, StreakPhase,
        StreakState,
    };
    use uuid::Uuid;

    fn completed(spot: &str, to_sort: &[&str], good: &[&str], at: DateTime<Utc>) -> Event {
        let mut items: Vec<Item> = to_sort
            .iter()
            .map(|p| Item {
                phrase: p.to_string(),
                qualifier: None,
                status: ItemStatus::ToSort,
            })
            .collect();
        items.extend(good.iter().map(|p| Item {
            phrase: p.to_string(),
            qualifier: None,
            status: ItemStatus::Matched,
        }));
        Event::new(
            "test",
            EventPayload::CheckCompleted(CheckResult {
                id: Uuid::new_v4(),
                spot_id: spot.into(),
                definition_id: Uuid::new_v4(),
                timestamp: at,
                trigger: CheckTrigger::Automatic,
                items,
                notes: "x".repeat(400),
                is_sorted: to_sort.is_empty(),
            }),
        )
    }

    #[test]
    fn check_projection() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.register("desk", "Work Desk");
        surface.apply(&completed("desk", &["mug", "papers"], &["laptop"], now));

        let e = surface.spot_entities("desk", now).unwrap();
        assert_eq!(e.name, "Work Desk");
        assert!(!e.sorted);
        assert!(e.needs_attention);
        assert_eq!(e.to_sort_count, 2);
        assert_eq!(e.to_sort_items, ["mug", "papers"]);
        assert_eq!(e.looking_good_count, 1);
        assert_eq!(e.notes.chars().count(), MAX_STATE_CHARS);
        assert_eq!(e.last_check, Some(now));
        assert!(!e.overdue);
    }

    #[test]
    fn snooze_hides_needs_attention() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.apply(&completed("desk", &["mug"], &[], now));
        let snooze = SnoozeState::for_duration(now, Duration::minutes(30));
        surface.apply(&Event::new(
            "test",
            EventPayload::SnoozeChanged {
                spot_id: "desk".into(),
                snooze: Some(snooze),
            },
        ));

        let e = surface.spot_entities("desk", now).unwrap();
        assert!(e.snoozed);
        assert!(!e.needs_attention);
        assert_eq!(e.snooze_until, snooze.until);

        // After the window closes the spot needs attention again.
        let later = surface.spot_entities("desk", now + Duration::hours(1)).unwrap();
        assert!(!later.snoozed);
        assert!(later.needs_attention);
    }

    #[test]
    fn failure_sets_error_and_success_clears_it() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.apply(&Event::new(
            "test",
            EventPayload::CheckFailed {
                spot_id: "desk".into(),
                trigger: CheckTrigger::Automatic,
                error: SpotError::Camera {
                    camera: "cam".into(),
                    details: "offline".into(),
                },
            },
        ));
        let err = surface.spot_entities("desk", now).unwrap().last_error.unwrap();
        assert!(err.starts_with(CHECK_FAILED_NOTE));

        surface.apply(&completed("desk", &[], &[], now));
        assert_eq!(surface.spot_entities("desk", now).unwrap().last_error, None);
    }

    #[test]
    fn streak_and_reset_project_sorted() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.apply(&completed("desk", &["mug"], &[], now));
        surface.apply(&Event::new(
            "test",
            EventPayload::StreakUpdated {
                spot_id: "desk".into(),
                streak: StreakState {
                    phase: StreakPhase::Sorted,
                    current: 0,
                    best: 6,
                    ..StreakState::default()
                },
            },
        ));
        let e = surface.spot_entities("desk", now).unwrap();
        assert!(e.sorted);
        assert_eq!(e.best_streak, 6);
    }

    #[test]
    fn report_notes_replace_classifier_notes() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.apply(&completed("desk", &[], &[], now));
        surface.apply(&Event::new(
            "test",
            EventPayload::ReportRendered(RenderedReport {
                spot_id: "desk".into(),
                check_id: Uuid::new_v4(),
                voice: "direct".into(),
                headline: "Desk is sorted".into(),
                to_sort: vec![],
                looking_good: vec![],
                narrative: vec!["Day 3 of your streak.".into()],
            }),
        ));
        assert_eq!(surface.spot_entities("desk", now).unwrap().notes, "Day 3 of your streak.");
    }

    #[test]
    fn overdue_after_threshold() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        surface.register("never", "Never checked");
        surface.apply(&completed("desk", &[], &[], now - Duration::hours(49)));
        assert!(surface.spot_entities("desk", now).unwrap().overdue);
        assert!(!surface.spot_entities("never", now).unwrap().overdue);
    }

    #[test]
    fn system_entities_aggregate() {
        let now = Utc::now();
        let mut surface = EntitySurface::default();
        assert!(!surface.system_entities(now).all_sorted);

        surface.apply(&completed("desk", &[], &[], now));
        surface.apply(&completed("hall", &["shoes"], &[], now));
        for (spot, hours) in [("desk", 6), ("hall", 2)] {
            surface.apply(&Event::new(
                "test",
                EventPayload::ScheduleUpdated {
                    spot_id: spot.into(),
                    next_check: Some(now + Duration::hours(hours)),
                },
            ));
        }
        let sys = surface.system_entities(now);
        assert_eq!(sys.spot_count, 2);
        assert_eq!(sys.spots_needing_attention, 1);
        assert!(!sys.all_sorted);
        assert_eq!(sys.next_scheduled_check, Some(now + Duration::hours(2)));

        surface.apply(&Event::new(
            "test",
            EventPayload::SpotRemoved {
                spot_id: "hall".into(),
            },
        ));
        let sys = surface.system_entities(now);
        assert_eq!(sys.spot_count, 1);
        assert!(sys.all_sorted);
    }
}
