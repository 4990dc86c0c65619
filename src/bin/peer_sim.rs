//! Simulated peer for local testing
//!
//! Connects to the hub, registers, heartbeats, and answers every task with an
//! echo of what it received.
//!
//! Environment: `HUB_URL` (default `ws://127.0.0.1:8080/ws`), `PEER_ID`,
//! `PEER_NAME`, `PEER_LAT`, `PEER_LON`, `PEER_TAGS` (comma separated),
//! `HEARTBEAT_SECS` (default 10), `RESPONSE_DELAY_MS` (default 0).

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerhub_backend::protocol::OutboundMessage;

struct SimConfig {
    hub_url: String,
    peer_id: String,
    name: String,
    lat: Option<f64>,
    lon: Option<f64>,
    tags: Vec<String>,
    heartbeat: Duration,
    response_delay: Duration,
}

impl SimConfig {
    fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let peer_id = var("PEER_ID").unwrap_or_else(|| format!("sim-{}", uuid::Uuid::new_v4()));

        Self {
            hub_url: var("HUB_URL").unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string()),
            name: var("PEER_NAME").unwrap_or_else(|| peer_id.clone()),
            peer_id,
            lat: var("PEER_LAT").and_then(|v| v.parse().ok()),
            lon: var("PEER_LON").and_then(|v| v.parse().ok()),
            tags: var("PEER_TAGS")
                .map(|v| v.split(',').map(|t| t.trim().to_string()).collect())
                .unwrap_or_default(),
            heartbeat: Duration::from_secs(
                var("HEARTBEAT_SECS").and_then(|v| v.parse().ok()).unwrap_or(10),
            ),
            response_delay: Duration::from_millis(
                var("RESPONSE_DELAY_MS").and_then(|v| v.parse().ok()).unwrap_or(0),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimConfig::from_env();
    run(config).await
}

async fn run(config: SimConfig) -> Result<()> {
    let (socket, _) = connect_async(config.hub_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", config.hub_url))?;
    tracing::info!(peer_id = %config.peer_id, url = %config.hub_url, "Connected to hub");

    let (mut sink, mut stream) = socket.split();

    let register = json!({
        "type": "register",
        "peerId": config.peer_id,
        "meta": {
            "name": config.name,
            "lat": config.lat,
            "lon": config.lon,
            "tags": config.tags,
        }
    });
    sink.send(Message::Text(register.to_string())).await?;

    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let msg = json!({"type": "heartbeat", "peerId": config.peer_id});
                sink.send(Message::Text(msg.to_string())).await?;
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else {
                    tracing::warn!("Hub closed the connection");
                    return Ok(());
                };
                match incoming? {
                    Message::Text(text) => {
                        if let Some(reply) = handle_frame(&config, &text).await {
                            sink.send(Message::Text(reply.to_string())).await?;
                        }
                    }
                    Message::Close(_) => {
                        tracing::warn!("Hub closed the connection");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Build the reply for one hub frame, if it needs one
async fn handle_frame(config: &SimConfig, text: &str) -> Option<Value> {
    let message: OutboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Unrecognized frame from hub");
            return None;
        }
    };

    match message {
        OutboundMessage::Task {
            task_id,
            task,
            file,
        } => {
            tracing::info!(task_id = %task_id, "Task received");
            if !config.response_delay.is_zero() {
                tokio::time::sleep(config.response_delay).await;
            }
            Some(json!({
                "type": "taskResult",
                "peerId": config.peer_id,
                "taskId": task_id,
                "result": {
                    "echo": task,
                    "fileSize": file.map(|f| f.size),
                    "handledBy": config.name,
                }
            }))
        }
        OutboundMessage::Info { message } => {
            tracing::info!("Hub: {}", message);
            None
        }
        OutboundMessage::Error { message } => {
            tracing::warn!("Hub error: {}", message);
            None
        }
    }
}
