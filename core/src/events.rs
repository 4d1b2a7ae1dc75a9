//! Notification fabric
//!
//! Debug events fan out to any number of observers over a tokio broadcast
//! channel. Publishing never blocks and works from plain worker threads; with
//! no subscriber attached the event is simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::hazard::HazardReport;
use crate::types::{PauseReason, UnitId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DebugEvent {
    Paused { unit: UnitId, reason: PauseReason },
    Continued { unit: UnitId },
    Finished { unit: UnitId },
    Split { parent: UnitId, children: Vec<UnitId> },
    Hazard(HazardReport),
    /// The execution forest changed shape (fork or collapse).
    TreeChanged,
    /// A forced stop gave up with units still alive.
    StopFailed { remaining: usize },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DebugEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: DebugEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.publish(DebugEvent::TreeChanged);
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_events_reach_every_subscriber() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(DebugEvent::Finished { unit: UnitId(3) });

        assert!(matches!(
            first.try_recv(),
            Ok(DebugEvent::Finished { unit: UnitId(3) })
        ));
        assert!(matches!(
            second.try_recv(),
            Ok(DebugEvent::Finished { unit: UnitId(3) })
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DebugEvent::Paused {
            unit: UnitId(1),
            reason: PauseReason::Breakpoint,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "paused");
        assert_eq!(json["unit"], 1);
        assert_eq!(json["reason"], "breakpoint");
    }
}
