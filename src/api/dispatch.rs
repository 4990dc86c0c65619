//! Dispatch API - fan a task out to peers and return what came back
//!
//! Two entry points share the coordinator: a JSON body for payload-only tasks
//! and a multipart form for tasks that carry a file.

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::dispatch::{Attachment, DispatchRequest, DispatchResult};
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchBody {
    /// Peer ids to target; omit to broadcast to every registered peer
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    /// Opaque task description forwarded to peers
    #[schema(value_type = Object)]
    pub task: Value,
    /// Collection window in seconds (default 12)
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

/// Dispatch a task described by a JSON body
#[utoipa::path(
    post,
    path = "/api/dispatch",
    tag = "dispatch",
    request_body = DispatchBody,
    responses(
        (status = 200, description = "Collected responses", body = DispatchResult),
        (status = 400, description = "No matching targets or invalid timeout")
    )
)]
pub async fn dispatch_json(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> AppResult<Json<DispatchResult>> {
    let request = DispatchRequest {
        targets: body.targets,
        payload: body.task,
        attachment: None,
        timeout_secs: body.timeout_seconds,
    };
    Ok(Json(state.dispatcher.dispatch(request).await?))
}

/// Dispatch a task with an optional file attachment.
///
/// Form fields: `task` (required; JSON, or plain text), `targets` (JSON array or comma
/// separated ids), `timeoutSeconds`, `file`.
#[utoipa::path(
    post,
    path = "/api/dispatch/upload",
    tag = "dispatch",
    responses(
        (status = 200, description = "Collected responses", body = DispatchResult),
        (status = 400, description = "Malformed form, no matching targets or invalid timeout"),
        (status = 413, description = "Attachment too large")
    )
)]
pub async fn dispatch_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DispatchResult>> {
    let mut request = DispatchRequest::default();
    let mut has_task = false;
    let limit = state.config.max_upload_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "task" => {
                request.payload = parse_task(&field_text(field).await?);
                has_task = true;
            }
            "targets" => request.targets = parse_targets(&field_text(field).await?)?,
            "timeoutSeconds" => {
                let text = field_text(field).await?;
                request.timeout_secs = parse_timeout(&text)?;
            }
            "file" => request.attachment = Some(read_attachment(field, limit).await?),
            other => {
                tracing::debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    if !has_task {
        return Err(AppError::bad_request("task field is required"));
    }

    if let Some(attachment) = &request.attachment {
        info!(
            name = %attachment.name,
            size = attachment.data.len(),
            "Dispatching task with attachment"
        );
    }

    Ok(Json(state.dispatcher.dispatch(request).await?))
}

async fn field_text(field: Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read form field: {}", e)))
}

async fn read_attachment(field: Field<'_>, limit: usize) -> AppResult<Attachment> {
    let name = field.file_name().unwrap_or("upload.bin").to_string();
    let mime = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;

    if data.len() > limit {
        return Err(AppError::PayloadTooLarge(format!(
            "{} is {} bytes, limit is {}",
            name,
            data.len(),
            limit
        )));
    }

    Ok(Attachment {
        name,
        mime,
        data: data.to_vec(),
    })
}

/// Form values are usually JSON; anything else is passed along as a string
fn parse_task(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_targets(text: &str) -> AppResult<Option<Vec<String>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.starts_with('[') {
        let ids: Vec<String> = serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("targets must be a list of ids: {}", e)))?;
        return Ok(Some(ids));
    }
    Ok(Some(
        text.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    ))
}

fn parse_timeout(text: &str) -> AppResult<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<f64>()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("timeoutSeconds is not a number: {}", text)))
}
