//! Access events - what the access manager did, as it happens
//!
//! Embedders (and tests) subscribe to follow the lock without poking at it.

use tokio::sync::broadcast;

use crate::http::RequestId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessEvent {
    /// Lock granted
    Admitted { id: RequestId },
    /// Lock busy, request appended to the wait queue
    Queued { id: RequestId },
    /// Lock busy, queued entry replaced in place
    Requeued { id: RequestId },
    Released { id: RequestId },
    /// Release by a non-holder, or while free
    ReleaseIgnored {
        id: RequestId,
        holder: Option<RequestId>,
    },
    /// Lock cleared and session dropped regardless of holder
    Reset { holder: Option<RequestId> },
    HangDetected { id: RequestId },
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<AccessEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, event: AccessEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccessEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
