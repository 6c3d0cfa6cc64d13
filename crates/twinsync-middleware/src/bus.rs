//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Checks`] | Completed and failed checks, rendered reports |
//! | [`Topic::SpotState`] | Streak, snooze and schedule changes, spot removal |
//! | [`Topic::SystemAlerts`] | Failures an operator should see (camera faults, quota) |
//!
//! Every event is additionally mirrored onto a firehose channel
//! ([`EventBus::subscribe_all`]) for consumers, such as the entity surface,
//! that need the whole picture in publication order.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{trace, warn};
use twinsync_types::{Event, EventPayload};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Checks,
    SpotState,
    SystemAlerts,
}

impl Topic {
    /// Natural lane for a payload.
    pub fn for_payload(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::CheckCompleted(_)
            | EventPayload::CheckFailed { .. }
            | EventPayload::ReportRendered(_) => Topic::Checks,
            EventPayload::StreakUpdated { .. }
            | EventPayload::SnoozeChanged { .. }
            | EventPayload::ScheduleUpdated { .. }
            | EventPayload::SpotRemoved { .. } => Topic::SpotState,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("No subscribers for topic {0:?}")]
    NoSubscribers(Topic),
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    checks: broadcast::Sender<Event>,
    spot_state: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        let (checks, _) = broadcast::channel(capacity);
        let (spot_state, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            firehose,
            checks,
            spot_state,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel (and the firehose).
    ///
    /// Returns the number of topic receivers that were handed the event, or
    /// [`BusError::NoSubscribers`] when nobody listens on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, BusError> {
        let _ = self.firehose.send(event.clone());
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| BusError::NoSubscribers(topic))
    }

    /// Publish `event` on its natural topic. Having no listener is normal
    /// for a headless deployment, so this never fails; it returns the number
    /// of topic receivers reached.
    pub fn emit(&self, event: Event) -> usize {
        let topic = Topic::for_payload(&event.payload);
        match self.publish_to(topic, event) {
            Ok(n) => n,
            Err(e) => {
                trace!(error = %e, "event dropped");
                0
            }
        }
    }

    /// Raise an operator-facing alert on [`Topic::SystemAlerts`].
    pub fn alert(&self, event: Event) -> usize {
        self.publish_to(Topic::SystemAlerts, event).unwrap_or(0)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.firehose.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Checks => &self.checks,
            Topic::SpotState => &self.spot_state,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to one [`Topic`] channel or to the firehose.
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped. The caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag. Returns `None` once the
    /// bus is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive used to drain already-published events.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to; `None` for the firehose.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}
