//! Peer registry
//!
//! Authoritative map of peer id to connection, metadata and last-seen time.
//! All access goes through [`PeerRegistry`]; callers only ever receive
//! snapshots.

mod connection;
mod liveness;
mod peer;

pub use connection::{Outbound, PeerConnection, SendError};
pub use liveness::{LivenessMonitor, SweepReport};
pub use peer::{Peer, PeerFilter, PeerMeta};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{Event, EventBus};

#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<BTreeMap<String, Peer>>>,
    events: EventBus,
}

impl PeerRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            peers: Arc::new(RwLock::new(BTreeMap::new())),
            events,
        }
    }

    /// Insert or replace the entry for `id`.
    ///
    /// A replaced entry's connection is closed unless it is the same
    /// connection registering again.
    pub async fn register(
        &self,
        id: impl Into<String>,
        connection: Option<PeerConnection>,
        meta: PeerMeta,
    ) {
        let id = id.into();
        let connected = connection.is_some();
        let new_conn_id = connection.as_ref().map(PeerConnection::id);

        let previous = {
            let mut peers = self.peers.write().await;
            let previous = peers.insert(
                id.clone(),
                Peer {
                    id: id.clone(),
                    meta,
                    last_seen: Utc::now(),
                    connection,
                },
            );
            metrics::gauge!("peerhub_peers_registered", peers.len() as f64);
            previous
        };

        if let Some(old) = previous.and_then(|p| p.connection) {
            if Some(old.id()) != new_conn_id {
                debug!(peer_id = %id, "Closing connection of replaced registration");
                old.close();
            }
        }

        info!(peer_id = %id, connected, "Peer registered");
        self.events.emit(Event::PeerRegistered {
            peer_id: id,
            connected,
        });
    }

    /// Refresh `last_seen`. Unknown ids are ignored; returns whether the id
    /// was registered.
    pub async fn touch(&self, id: &str) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(id) {
            Some(peer) => {
                peer.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove `id` and close its connection. Idempotent.
    pub async fn remove(&self, id: &str) -> Option<Peer> {
        let removed = {
            let mut peers = self.peers.write().await;
            let removed = peers.remove(id);
            metrics::gauge!("peerhub_peers_registered", peers.len() as f64);
            removed
        }?;

        if let Some(conn) = &removed.connection {
            conn.close();
        }
        info!(peer_id = %id, "Peer removed");
        self.events.emit(Event::PeerRemoved {
            peer_id: id.to_string(),
        });
        Some(removed)
    }

    /// Remove `id` only while it is still bound to `connection_id`.
    ///
    /// Used when a socket goes away so a stale connection cannot drop the
    /// registration that replaced it.
    pub async fn remove_connection(&self, id: &str, connection_id: Uuid) -> bool {
        match self.take_owned(id, connection_id).await {
            Some(_) => {
                info!(peer_id = %id, "Peer disconnected");
                self.events.emit(Event::PeerRemoved {
                    peer_id: id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Liveness eviction: like [`remove_connection`](Self::remove_connection)
    /// but also closes the socket.
    pub(crate) async fn evict(&self, id: &str, connection_id: Uuid) -> bool {
        let Some(peer) = self.take_owned(id, connection_id).await else {
            return false;
        };
        if let Some(conn) = &peer.connection {
            conn.close();
        }
        metrics::increment_counter!("peerhub_peers_evicted_total");
        info!(peer_id = %id, "Peer evicted after missing liveness probe");
        self.events.emit(Event::PeerEvicted {
            peer_id: id.to_string(),
        });
        true
    }

    async fn take_owned(&self, id: &str, connection_id: Uuid) -> Option<Peer> {
        let mut peers = self.peers.write().await;
        let owned = peers
            .get(id)
            .and_then(|p| p.connection.as_ref())
            .is_some_and(|c| c.id() == connection_id);
        if !owned {
            return None;
        }
        let removed = peers.remove(id);
        metrics::gauge!("peerhub_peers_registered", peers.len() as f64);
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    /// Snapshot of entries matching `filter`, ordered by id
    pub async fn list(&self, filter: &PeerFilter) -> Vec<Peer> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    /// All registered ids, ordered
    pub async fn ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Current connection (if any) for each of `ids` that is registered
    pub async fn connections(&self, ids: &[String]) -> Vec<(String, Option<PeerConnection>)> {
        let peers = self.peers.read().await;
        ids.iter()
            .filter_map(|id| peers.get(id).map(|p| (id.clone(), p.connection.clone())))
            .collect()
    }

    /// Every entry that owns a connection
    pub async fn connected(&self) -> Vec<(String, PeerConnection)> {
        self.peers
            .read()
            .await
            .values()
            .filter_map(|p| p.connection.clone().map(|c| (p.id.clone(), c)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
