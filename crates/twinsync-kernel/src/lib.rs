//! `twinsync-kernel` – the rule engine.
//!
//! It does not look at images and does not render anything; it decides.
//! Everything here is synchronous and side-effect free apart from the state
//! passed in by the caller.
//!
//! # Modules
//!
//! - [`comparator`] – [`reconcile`][comparator::reconcile]: turns a classifier
//!   verdict into the canonical [`CheckResult`][twinsync_types::CheckResult]
//!   by partitioning items into to-sort and looking-good.
//! - [`streak`] – [`StreakTracker`][streak::StreakTracker]: the
//!   sorted / needs-attention state machine with the once-per-calendar-day
//!   increment rule.
//! - [`scheduler`] – [`next_eligible_check`][scheduler::next_eligible_check]:
//!   cadence arithmetic clamped past an active snooze window.
//! - [`check_guard`] – [`CheckGuard`][check_guard::CheckGuard]: the per-spot
//!   single-in-flight flag, released by dropping its
//!   [`CheckPermit`][check_guard::CheckPermit].

pub mod check_guard;
pub mod comparator;
pub mod scheduler;
pub mod streak;

pub use check_guard::{CheckGuard, CheckPermit};
pub use comparator::{CheckContext, reconcile};
pub use scheduler::{is_due, next_eligible_check};
pub use streak::StreakTracker;
