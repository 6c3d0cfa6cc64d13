//! [`CheckGuard`] – at most one in-flight check per spot.
//!
//! The guard is a single-owner flag. [`CheckGuard::try_acquire`] either
//! hands out a [`CheckPermit`] or fails immediately with
//! [`SpotError::CheckInProgress`]; requests are never queued. Dropping the
//! permit (on success, failure, timeout or panic unwinding) releases the
//! flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use twinsync_types::SpotError;

/// Per-spot in-flight flag.
///
/// # Example
///
/// ```
/// use twinsync_kernel::CheckGuard;
///
/// let guard = CheckGuard::new("desk");
/// let permit = guard.try_acquire().unwrap();
/// assert!(guard.try_acquire().is_err());
/// drop(permit);
/// assert!(guard.try_acquire().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CheckGuard {
    spot_id: String,
    in_flight: Arc<AtomicBool>,
}

impl CheckGuard {
    pub fn new(spot_id: impl Into<String>) -> Self {
        Self {
            spot_id: spot_id.into(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the spot for one check.
    pub fn try_acquire(&self) -> Result<CheckPermit, SpotError> {
        match self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(CheckPermit {
                in_flight: Arc::clone(&self.in_flight),
            }),
            Err(_) => {
                warn!(spot = %self.spot_id, "check rejected: another check is in flight");
                Err(SpotError::CheckInProgress(self.spot_id.clone()))
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the spot's single check slot.
#[derive(Debug)]
pub struct CheckPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for CheckPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
