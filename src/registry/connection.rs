//! Handle to a peer's live WebSocket
//!
//! The socket itself is owned by its session task. Everyone else talks to it
//! through this handle, which queues frames onto an unbounded channel drained
//! by the session's writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::OutboundMessage;

/// Frames queued for the socket writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PeerConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
    awaiting_answer: Arc<AtomicBool>,
}

impl PeerConnection {
    /// Create a handle plus the receiving end for the socket writer
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: Uuid::new_v4(),
            tx,
            awaiting_answer: Arc::new(AtomicBool::new(false)),
        };
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Open as long as the writer is still draining the queue
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Open and not sitting on an unanswered probe
    pub fn is_responsive(&self) -> bool {
        self.is_open() && !self.awaiting_answer()
    }

    pub fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let text = serde_json::to_string(message)?;
        self.send_text(text)
    }

    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| SendError::Closed)
    }

    /// Send a liveness probe and mark the connection as waiting for its answer
    pub fn probe(&self) -> Result<(), SendError> {
        self.awaiting_answer.store(true, Ordering::SeqCst);
        self.tx.send(Outbound::Ping).map_err(|_| SendError::Closed)
    }

    pub fn awaiting_answer(&self) -> bool {
        self.awaiting_answer.load(Ordering::SeqCst)
    }

    /// Record a probe answer (pong)
    pub fn answered(&self) {
        self.awaiting_answer.store(false, Ordering::SeqCst);
    }

    /// Ask the writer to close the socket
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}
