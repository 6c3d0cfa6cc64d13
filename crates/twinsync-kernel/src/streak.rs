//! [`StreakTracker`] – consecutive sorted-day state machine.
//!
//! | event                     | phase after      | current streak                                  |
//! |---------------------------|------------------|-------------------------------------------------|
//! | check, `is_sorted = true`  | sorted           | +1 unless already incremented this local day    |
//! | check, `is_sorted = false` | needs-attention  | 0 (best untouched)                              |
//! | explicit reset             | sorted           | unchanged                                       |
//!
//! A reset acknowledges a fix nobody has verified yet, so it never counts
//! toward a day. A later sorted check on the same day still increments once.
//! Calendar days without any check neither extend nor break the streak.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use tracing::debug;
use twinsync_types::{CheckResult, StreakPhase, StreakState};

/// Applies streak transitions using local calendar days at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakTracker {
    offset: FixedOffset,
}

impl StreakTracker {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    fn set_phase(&self, state: &mut StreakState, phase: StreakPhase, day: NaiveDate) {
        if state.phase != phase {
            state.phase = phase;
            state.last_change = Some(day);
        }
    }

    /// Apply a completed check.
    pub fn apply_check(&self, state: &mut StreakState, result: &CheckResult) {
        let day = self.local_date(result.timestamp);
        if result.is_sorted {
            self.set_phase(state, StreakPhase::Sorted, day);
            if state.last_increment.is_none_or(|last| last < day) {
                state.current += 1;
                state.best = state.best.max(state.current);
                state.last_increment = Some(day);
            }
        } else {
            self.set_phase(state, StreakPhase::NeedsAttention, day);
            state.current = 0;
            // A fresh run may start later today.
            state.last_increment = None;
        }
        debug!(
            spot = %result.spot_id,
            phase = ?state.phase,
            current = state.current,
            best = state.best,
            "streak updated"
        );
    }

    /// Apply an explicit user reset at `at`.
    pub fn apply_reset(&self, state: &mut StreakState, at: DateTime<Utc>) {
        let day = self.local_date(at);
        self.set_phase(state, StreakPhase::Sorted, day);
        state.total_resets += 1;
        state.last_reset = Some(at);
    }
}

impl Default for StreakTracker {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}
