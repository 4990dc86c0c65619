//! Peers API - registry listing and HTTP-side registration
//!
//! Peers registered here have no live connection: they can be listed and
//! targeted, but always come back as missing from a dispatch.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::geo::Proximity;
use crate::registry::{Peer, PeerFilter, PeerMeta};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListPeersQuery {
    /// Origin latitude
    pub lat: Option<f64>,
    /// Origin longitude
    pub lon: Option<f64>,
    /// Only peers within this many kilometers of the origin
    pub radius_km: Option<f64>,
    /// Comma separated peer ids
    pub ids: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPeerRequest {
    pub peer_id: String,
    #[serde(default)]
    pub meta: PeerMeta,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    pub id: String,
    pub meta: PeerMeta,
    pub last_seen: DateTime<Utc>,
    pub age_sec: i64,
    pub connected: bool,
    pub online: bool,
    /// Present only when an origin was given; null when undefined
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub distance_km: Option<Option<f64>>,
}

impl PeerView {
    fn new(peer: Peer, now: DateTime<Utc>, origin: Option<&Proximity>) -> Self {
        let distance_km = origin.map(|o| o.distance_to(peer.meta.coordinates()));
        Self {
            age_sec: peer.age_secs(now),
            connected: peer.is_connected(),
            online: peer.is_online(),
            id: peer.id,
            meta: peer.meta,
            last_seen: peer.last_seen,
            distance_km,
        }
    }
}

/// Build the registry filter and the distance origin from query params
fn parse_query(query: &ListPeersQuery) -> AppResult<(PeerFilter, Option<Proximity>)> {
    let origin = match (query.lat, query.lon) {
        (Some(lat), Some(lon)) => {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(AppError::bad_request("lat/lon must be finite numbers"));
            }
            Some(Proximity::new(lat, lon, query.radius_km.unwrap_or(f64::INFINITY)))
        }
        (None, None) => None,
        _ => return Err(AppError::bad_request("lat and lon must be given together")),
    };

    let mut filter = PeerFilter::all();
    if let Some(radius) = query.radius_km {
        let Some(origin) = origin else {
            return Err(AppError::bad_request("radiusKm requires lat and lon"));
        };
        if radius.is_nan() || radius < 0.0 {
            return Err(AppError::bad_request("radiusKm must be a non-negative number"));
        }
        filter = filter.near(origin);
    }
    if let Some(ids) = &query.ids {
        filter = filter.with_ids(ids.split(',').map(str::trim).filter(|s| !s.is_empty()));
    }

    Ok((filter, origin))
}

/// List registered peers
#[utoipa::path(
    get,
    path = "/api/peers",
    tag = "peers",
    params(ListPeersQuery),
    responses(
        (status = 200, description = "Registry snapshot", body = [PeerView]),
        (status = 400, description = "Invalid origin or radius")
    )
)]
pub async fn list_peers(
    State(state): State<AppState>,
    Query(query): Query<ListPeersQuery>,
) -> AppResult<Json<Vec<PeerView>>> {
    let (filter, origin) = parse_query(&query)?;
    let now = Utc::now();

    let peers = state
        .registry
        .list(&filter)
        .await
        .into_iter()
        .map(|p| PeerView::new(p, now, origin.as_ref()))
        .collect();

    Ok(Json(peers))
}

/// Get a single peer
#[utoipa::path(
    get,
    path = "/api/peers/{id}",
    tag = "peers",
    params(("id" = String, Path, description = "Peer id")),
    responses(
        (status = 200, description = "Peer", body = PeerView),
        (status = 404, description = "Peer not registered")
    )
)]
pub async fn get_peer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PeerView>> {
    let peer = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Peer not found: {}", id)))?;
    Ok(Json(PeerView::new(peer, Utc::now(), None)))
}

/// Register a peer without a live connection
#[utoipa::path(
    post,
    path = "/api/peers/register",
    tag = "peers",
    request_body = RegisterPeerRequest,
    responses(
        (status = 200, description = "Peer registered", body = PeerView),
        (status = 400, description = "Missing peer id")
    )
)]
pub async fn register_peer(
    State(state): State<AppState>,
    Json(req): Json<RegisterPeerRequest>,
) -> AppResult<Json<PeerView>> {
    let peer_id = req.peer_id.trim().to_string();
    if peer_id.is_empty() {
        return Err(AppError::bad_request("peerId must not be empty"));
    }

    state.registry.register(peer_id.clone(), None, req.meta).await;

    let peer = state
        .registry
        .get(&peer_id)
        .await
        .ok_or_else(|| AppError::internal("Peer vanished right after registration"))?;
    Ok(Json(PeerView::new(peer, Utc::now(), None)))
}

/// Refresh a peer's last-seen time
#[utoipa::path(
    post,
    path = "/api/peers/{id}/heartbeat",
    tag = "peers",
    params(("id" = String, Path, description = "Peer id")),
    responses(
        (status = 200, description = "Heartbeat accepted", body = PeerView),
        (status = 404, description = "Peer not registered")
    )
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PeerView>> {
    if !state.registry.touch(&id).await {
        return Err(AppError::NotFound(format!("Peer not found: {}", id)));
    }
    get_peer(State(state), Path(id)).await
}

/// Remove a peer, closing its connection
#[utoipa::path(
    delete,
    path = "/api/peers/{id}",
    tag = "peers",
    params(("id" = String, Path, description = "Peer id")),
    responses(
        (status = 204, description = "Peer removed (or was not registered)")
    )
)]
pub async fn remove_peer(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.registry.remove(&id).await;
    StatusCode::NO_CONTENT
}
