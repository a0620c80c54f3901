//! Fan-out of tracker notifications to any number of subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::machine::TrackingState;
use crate::types::{EntryId, ProjectId, TimeEntry};

/// Notifications published by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A closed entry was persisted. Carries its assigned ID.
    EntryRecorded { entry: TimeEntry },
    /// A persisted entry was categorized after the fact.
    EntryUpdated {
        entry_id: EntryId,
        project_id: Option<ProjectId>,
    },
    /// A closed entry could not be written after all retries.
    PersistFailed { entry: TimeEntry, reason: String },
    StateChanged { state: TrackingState },
}

/// Broadcast handle for [`TrackerEvent`]s.
///
/// Subscribers that fall more than the channel capacity behind skip the
/// oldest events and observe a `Lagged` error on their receiver.
#[derive(Debug, Clone)]
pub struct EntryEmitter {
    tx: broadcast::Sender<TrackerEvent>,
}

impl EntryEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event and returns how many subscribers received it.
    pub fn emit(&self, event: TrackerEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let emitter = EntryEmitter::new(4);
        assert_eq!(
            emitter.emit(TrackerEvent::StateChanged {
                state: TrackingState::Active
            }),
            0
        );
    }

    #[test]
    fn every_subscriber_receives_events() {
        let emitter = EntryEmitter::new(4);
        let mut first = emitter.subscribe();
        let mut second = emitter.subscribe();
        let event = TrackerEvent::EntryUpdated {
            entry_id: EntryId::new(3).unwrap(),
            project_id: ProjectId::new(1).ok(),
        };
        assert_eq!(emitter.emit(event.clone()), 2);
        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(TrackerEvent::StateChanged {
            state: TrackingState::Idle,
        })
        .unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["state"], "idle");
    }
}
