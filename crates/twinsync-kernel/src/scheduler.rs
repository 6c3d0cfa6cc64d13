//! Scheduler – when may the next automatic check run?
//!
//! The anchor is the finish time of the last *automatic* attempt, whether it
//! succeeded or failed. Anchoring on the finish time (not the originally
//! planned time) keeps a slow failure from producing a tight retry loop.
//!
//! ```text
//! candidate = max(anchor + interval, now)        (anchor missing: now + interval)
//! if snooze active at candidate:
//!     until = None  -> no automatic check
//!     until = T     -> candidate = T
//! ```
//!
//! Manual checks never consult the scheduler.

use chrono::{DateTime, Utc};
use tracing::debug;
use twinsync_types::{Cadence, SnoozeState};

/// Next time an automatic check is allowed, or `None` when the cadence is
/// manual or an indefinite snooze is in force.
pub fn next_eligible_check(
    cadence: Cadence,
    anchor: Option<DateTime<Utc>>,
    snooze: Option<&SnoozeState>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let interval = cadence.interval()?;
    let mut candidate = anchor.map_or(now + interval, |a| (a + interval).max(now));

    if let Some(snooze) = snooze.filter(|s| s.is_active(candidate)) {
        match snooze.until {
            Some(until) => candidate = until,
            None => {
                debug!(%cadence, "automatic checks suspended by indefinite snooze");
                return None;
            }
        }
    }
    debug!(%cadence, next = %candidate, "next automatic check computed");
    Some(candidate)
}

/// `true` when an automatic check scheduled for `next` should run at `now`.
pub fn is_due(next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    next.is_some_and(|next| next <= now)
}
