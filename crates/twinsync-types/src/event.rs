//! Event envelope routed over the middleware bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::check::{CheckResult, CheckTrigger};
use crate::error::SpotError;
use crate::state::{SnoozeState, StreakState};
use crate::voice::RenderedReport;

/// Unified event wrapper for the spot event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "twinsync-runtime::spot"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Spot the event concerns.
    pub fn spot_id(&self) -> &str {
        match &self.payload {
            EventPayload::CheckCompleted(result) => &result.spot_id,
            EventPayload::ReportRendered(report) => &report.spot_id,
            EventPayload::CheckFailed { spot_id, .. }
            | EventPayload::StreakUpdated { spot_id, .. }
            | EventPayload::SnoozeChanged { spot_id, .. }
            | EventPayload::ScheduleUpdated { spot_id, .. }
            | EventPayload::SpotRemoved { spot_id } => spot_id,
        }
    }
}

/// Variants of data that can be routed over the spot event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    CheckCompleted(CheckResult),
    CheckFailed {
        spot_id: String,
        trigger: CheckTrigger,
        error: SpotError,
    },
    StreakUpdated {
        spot_id: String,
        streak: StreakState,
    },
    SnoozeChanged {
        spot_id: String,
        snooze: Option<SnoozeState>,
    },
    ScheduleUpdated {
        spot_id: String,
        next_check: Option<DateTime<Utc>>,
    },
    ReportRendered(RenderedReport),
    SpotRemoved {
        spot_id: String,
    },
}
