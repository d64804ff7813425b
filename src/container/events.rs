use serde::Serialize;

use crate::models::RevisionId;

/// Wiring state transitions, delivered in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "revision", rename_all = "snake_case")]
pub enum WiringEvent {
    Resolved(RevisionId),
    Unresolved(RevisionId),
}

impl WiringEvent {
    pub fn revision(&self) -> RevisionId {
        match self {
            WiringEvent::Resolved(id) | WiringEvent::Unresolved(id) => *id,
        }
    }
}

/// Receives wiring events. Never called while the module database is locked.
pub trait WiringListener: Send + Sync {
    fn on_event(&self, event: &WiringEvent);
}

impl<F> WiringListener for F
where
    F: Fn(&WiringEvent) + Send + Sync,
{
    fn on_event(&self, event: &WiringEvent) {
        self(event)
    }
}
