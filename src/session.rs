//! Per-connection protocol handling
//!
//! A [`PeerSession`] turns inbound frames from one socket into registry and
//! task store operations. Protocol errors are answered with an `error` frame
//! and never close the connection.

use tracing::{debug, warn};

use crate::dispatch::{RecordOutcome, TaskStore};
use crate::protocol::{parse_inbound, InboundMessage, OutboundMessage};
use crate::registry::{PeerConnection, PeerRegistry};

pub struct PeerSession {
    conn: PeerConnection,
    registry: PeerRegistry,
    tasks: TaskStore,
    bound: Option<String>,
}

impl PeerSession {
    pub fn new(conn: PeerConnection, registry: PeerRegistry, tasks: TaskStore) -> Self {
        Self {
            conn,
            registry,
            tasks,
            bound: None,
        }
    }

    /// Peer id this connection registered as, if any
    pub fn bound_peer(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub async fn handle_text(&mut self, text: &str) {
        self.seen().await;

        let message = match parse_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer_id = ?self.bound, error = %e, "Rejected inbound message");
                self.reply(OutboundMessage::error(e.to_string()));
                return;
            }
        };

        match message {
            InboundMessage::Register(msg) => {
                if msg.peer_id.trim().is_empty() {
                    self.reply(OutboundMessage::error("peerId must not be empty"));
                    return;
                }
                if let Some(previous) = self.bound.take() {
                    if previous != msg.peer_id {
                        self.registry
                            .remove_connection(&previous, self.conn.id())
                            .await;
                    }
                }
                self.registry
                    .register(msg.peer_id.clone(), Some(self.conn.clone()), msg.meta)
                    .await;
                self.reply(OutboundMessage::info(format!(
                    "registered as {}",
                    msg.peer_id
                )));
                self.bound = Some(msg.peer_id);
            }
            // The bound peer was already touched above
            InboundMessage::Heartbeat(msg) => {
                self.authorize("heartbeat", &msg.peer_id);
            }
            InboundMessage::TaskResult(msg) => {
                let Some(peer_id) = self.authorize("taskResult", &msg.peer_id) else {
                    return;
                };
                let outcome = self
                    .tasks
                    .record_result(&msg.task_id, &peer_id, msg.result)
                    .await;
                if outcome == RecordOutcome::UnknownTask {
                    debug!(task_id = %msg.task_id, "Result for unknown or purged task");
                }
            }
        }
    }

    /// Non-text frames that are not valid UTF-8 are reported as malformed
    pub async fn handle_binary(&mut self, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_text(text).await,
            Err(_) => {
                self.seen().await;
                self.reply(OutboundMessage::error(
                    "malformed message: binary frame is not UTF-8 JSON",
                ));
            }
        }
    }

    /// Answer to a liveness probe
    pub async fn handle_pong(&self) {
        self.conn.answered();
        self.seen().await;
    }

    /// Socket gone: release the registration if it still belongs to us
    pub async fn close(self) {
        if let Some(peer_id) = &self.bound {
            self.registry
                .remove_connection(peer_id, self.conn.id())
                .await;
        }
    }

    /// The bound id when `claimed` matches it. A connection may only speak
    /// for the peer it registered as; anything else gets an error reply.
    fn authorize(&self, kind: &str, claimed: &str) -> Option<String> {
        match self.bound.as_deref() {
            Some(bound) if bound == claimed => Some(bound.to_string()),
            Some(bound) => {
                debug!(peer_id = %bound, claimed = %claimed, "Rejected {} for another peer", kind);
                self.reply(OutboundMessage::error(format!(
                    "{} for {} rejected: connection is registered as {}",
                    kind, claimed, bound
                )));
                None
            }
            None => {
                self.reply(OutboundMessage::error(format!(
                    "{} rejected: register before sending it",
                    kind
                )));
                None
            }
        }
    }

    async fn seen(&self) {
        if let Some(peer_id) = &self.bound {
            self.registry.touch(peer_id).await;
        }
    }

    fn reply(&self, message: OutboundMessage) {
        if let Err(e) = self.conn.send(&message) {
            warn!(peer_id = ?self.bound, error = %e, "Failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (PeerSession, UnboundedReceiver<Outbound>, PeerRegistry, TaskStore) {
        let registry = PeerRegistry::default();
        let tasks = TaskStore::default();
        let (conn, rx) = PeerConnection::new();
        let session = PeerSession::new(conn, registry.clone(), tasks.clone());
        (session, rx, registry, tasks)
    }

    async fn next_json(rx: &mut UnboundedReceiver<Outbound>) -> Value {
        match rx.recv().await.unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_binds_connection() {
        let (mut session, mut rx, registry, _) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"gpu-1","meta":{"name":"rig"}}"#)
            .await;

        assert_eq!(next_json(&mut rx).await["type"], "info");
        assert_eq!(session.bound_peer(), Some("gpu-1"));
        let peer = registry.get("gpu-1").await.unwrap();
        assert!(peer.is_connected());
        assert_eq!(peer.meta.name.as_deref(), Some("rig"));
    }

    #[tokio::test]
    async fn test_protocol_errors_are_answered() {
        let (mut session, mut rx, _, _) = session();

        session.handle_text("not json at all").await;
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().contains("malformed"));

        session.handle_text(r#"{"type":"dance"}"#).await;
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().contains("dance"));

        session.handle_binary(&[0xff, 0xfe]).await;
        assert_eq!(next_json(&mut rx).await["type"], "error");

        session.handle_text(r#"{"type":"register","peerId":" "}"#).await;
        assert_eq!(next_json(&mut rx).await["type"], "error");
    }

    #[tokio::test]
    async fn test_heartbeat_requires_registration() {
        let (mut session, mut rx, registry, _) = session();
        session
            .handle_text(r#"{"type":"heartbeat","peerId":"ghost"}"#)
            .await;
        assert!(registry.is_empty().await);
        assert_eq!(next_json(&mut rx).await["type"], "error");
    }

    #[tokio::test]
    async fn test_heartbeat_for_own_id_is_silent() {
        let (mut session, mut rx, _, _) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"p"}"#)
            .await;
        assert_eq!(next_json(&mut rx).await["type"], "info");

        session
            .handle_text(r#"{"type":"heartbeat","peerId":"p"}"#)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_results_only_accepted_for_bound_peer() {
        let registry = PeerRegistry::default();
        let tasks = TaskStore::default();
        let (a_conn, mut a_rx) = PeerConnection::new();
        let (b_conn, _b_rx) = PeerConnection::new();
        let (stranger_conn, mut stranger_rx) = PeerConnection::new();
        let mut a = PeerSession::new(a_conn, registry.clone(), tasks.clone());
        let mut b = PeerSession::new(b_conn, registry.clone(), tasks.clone());
        let mut stranger = PeerSession::new(stranger_conn, registry.clone(), tasks.clone());

        a.handle_text(r#"{"type":"register","peerId":"A"}"#).await;
        b.handle_text(r#"{"type":"register","peerId":"B"}"#).await;
        assert_eq!(next_json(&mut a_rx).await["type"], "info");

        let handle = tasks
            .create(
                vec!["A".to_string(), "B".to_string()],
                json!({}),
                None,
                Duration::from_secs(5),
            )
            .await;
        let result = |peer: &str, value: &str| {
            json!({"type": "taskResult", "peerId": peer, "taskId": handle.id, "result": value})
                .to_string()
        };

        // A answering on B's behalf, and an unregistered socket answering for A
        a.handle_text(&result("B", "forged")).await;
        assert_eq!(next_json(&mut a_rx).await["type"], "error");
        stranger.handle_text(&result("A", "forged")).await;
        assert_eq!(next_json(&mut stranger_rx).await["type"], "error");
        assert!(tasks.get(&handle.id).await.unwrap().responses.is_empty());

        // The real answers still count
        a.handle_text(&result("A", "from a")).await;
        b.handle_text(&result("B", "from b")).await;
        let record = tasks.get(&handle.id).await.unwrap();
        assert_eq!(record.responses["A"], json!("from a"));
        assert_eq!(record.responses["B"], json!("from b"));
    }

    #[tokio::test]
    async fn test_task_result_recorded_once() {
        let (mut session, _rx, _, tasks) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"p"}"#)
            .await;
        let handle = tasks
            .create(vec!["p".to_string()], json!({}), None, Duration::from_secs(5))
            .await;

        for value in ["first", "second"] {
            let msg = json!({
                "type": "taskResult",
                "peerId": "p",
                "taskId": handle.id,
                "result": value
            });
            session.handle_text(&msg.to_string()).await;
        }

        let record = tasks.get(&handle.id).await.unwrap();
        assert_eq!(record.responses["p"], json!("first"));
    }

    #[tokio::test]
    async fn test_close_unregisters_bound_peer() {
        let (mut session, _rx, registry, _) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"p"}"#)
            .await;
        session.close().await;
        assert!(registry.get("p").await.is_none());
    }

    #[tokio::test]
    async fn test_rebinding_releases_previous_id() {
        let (mut session, _rx, registry, _) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"old"}"#)
            .await;
        session
            .handle_text(r#"{"type":"register","peerId":"new"}"#)
            .await;

        assert!(registry.get("old").await.is_none());
        assert!(registry.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_pong_clears_pending_probe() {
        let (mut session, _rx, registry, _) = session();
        session
            .handle_text(r#"{"type":"register","peerId":"p"}"#)
            .await;
        let conn = registry.get("p").await.unwrap().connection.unwrap();
        conn.probe().unwrap();
        assert!(!registry.get("p").await.unwrap().is_online());

        session.handle_pong().await;
        assert!(registry.get("p").await.unwrap().is_online());
    }
}
