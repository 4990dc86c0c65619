//! Dashboard event bus
//!
//! Registry and task store changes are broadcast so the dashboard can follow
//! them over `/ws/events`. Sending never fails the caller: with no listeners
//! the event is dropped.

use serde::Serialize;
use tokio::sync::broadcast;

/// Events broadcasted via WebSocket
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "peer:registered")]
    PeerRegistered { peer_id: String, connected: bool },
    #[serde(rename = "peer:removed")]
    PeerRemoved { peer_id: String },
    #[serde(rename = "peer:evicted")]
    PeerEvicted { peer_id: String },
    #[serde(rename = "task:created")]
    TaskCreated { task_id: String, targets: Vec<String> },
    #[serde(rename = "task:result")]
    TaskResult { task_id: String, peer_id: String },
    #[serde(rename = "task:completed")]
    TaskCompleted {
        task_id: String,
        responded: usize,
        missing: usize,
    },
    #[serde(rename = "task:purged")]
    TaskPurged { task_id: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
