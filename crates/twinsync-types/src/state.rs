//! Per-spot mutable state that survives restarts: streak and snooze.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the streak state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreakPhase {
    Sorted,
    /// Initial phase: a spot is not assumed sorted before its first check.
    #[default]
    NeedsAttention,
}

/// Consecutive-sorted-day bookkeeping for one spot.
///
/// Transitions live in `twinsync-kernel`'s streak tracker; this is only the
/// persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreakState {
    pub phase: StreakPhase,
    /// Current run of calendar days that ended with a sorted check.
    pub current: u32,
    /// Longest run ever observed. Never decreases.
    pub best: u32,
    /// Local calendar date of the last phase change.
    pub last_change: Option<NaiveDate>,
    /// Local calendar date of the last increment of `current`.
    pub last_increment: Option<NaiveDate>,
    /// Number of explicit user resets.
    pub total_resets: u32,
    pub last_reset: Option<DateTime<Utc>>,
}

impl StreakState {
    pub fn is_sorted(&self) -> bool {
        self.phase == StreakPhase::Sorted
    }
}

/// A window during which automatic checks are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeState {
    pub start: DateTime<Utc>,
    /// End of the window; `None` snoozes until explicitly cancelled.
    pub until: Option<DateTime<Utc>>,
}

impl SnoozeState {
    /// Snooze from `now` for `duration`.
    pub fn for_duration(now: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self {
            start: now,
            until: Some(now + duration),
        }
    }

    /// Snooze from `now` until cancelled.
    pub fn indefinite(now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            until: None,
        }
    }

    /// `true` when `at` falls inside the window.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && self.until.is_none_or(|until| at < until)
    }

    /// `true` once the window has closed for good.
    pub fn has_expired(&self, at: DateTime<Utc>) -> bool {
        self.until.is_some_and(|until| at >= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn default_streak_needs_attention() {
        let s = StreakState::default();
        assert_eq!(s.phase, StreakPhase::NeedsAttention);
        assert!(!s.is_sorted());
        assert_eq!((s.current, s.best), (0, 0));
    }

    #[test]
    fn timed_snooze_window() {
        let now = Utc::now();
        let snooze = SnoozeState::for_duration(now, Duration::minutes(30));
        assert!(snooze.is_active(now));
        assert!(snooze.is_active(now + Duration::minutes(29)));
        assert!(!snooze.is_active(now + Duration::minutes(30)));
        assert!(!snooze.is_active(now - Duration::seconds(1)));
        assert!(snooze.has_expired(now + Duration::minutes(31)));
    }

    #[test]
    fn indefinite_snooze_never_expires() {
        let now = Utc::now();
        let snooze = SnoozeState::indefinite(now);
        assert!(snooze.is_active(now + Duration::days(365)));
        assert!(!snooze.has_expired(now + Duration::days(365)));
    }
}
