use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::PeerConnection;
use crate::geo::{self, Proximity};

/// Self-reported peer attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PeerMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub lat: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub lon: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PeerMeta {
    /// Latitude/longitude when both resolve to finite numbers
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = geo::coordinate(self.lat.as_ref()?)?;
        let lon = geo::coordinate(self.lon.as_ref()?)?;
        Some((lat, lon))
    }
}

/// Registry entry. Handed out as a snapshot; mutating a clone does nothing.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    pub meta: PeerMeta,
    pub last_seen: DateTime<Utc>,
    pub connection: Option<PeerConnection>,
}

impl Peer {
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_open())
    }

    /// Connected and answered the most recent liveness probe
    pub fn is_online(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_responsive())
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_seen).num_seconds().max(0)
    }
}

/// Restricts a registry listing. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    pub ids: Option<BTreeSet<String>>,
    pub near: Option<Proximity>,
}

impl PeerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn near(mut self, proximity: Proximity) -> Self {
        self.near = Some(proximity);
        self
    }

    pub fn matches(&self, peer: &Peer) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&peer.id) {
                return false;
            }
        }
        match &self.near {
            Some(proximity) => proximity.contains(peer.meta.coordinates()),
            None => true,
        }
    }
}
