use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::dispatch::{TaskRecord, TaskStatus};
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub status: TaskStatus,
    pub targets: Vec<String>,
    #[schema(value_type = Object)]
    pub responses: BTreeMap<String, Value>,
    pub missing: Vec<String>,
    #[schema(value_type = Object)]
    pub task: Value,
    pub attachment: Option<AttachmentInfo>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Attachment metadata; the bytes are never echoed back
#[derive(Debug, Serialize, ToSchema)]
pub struct AttachmentInfo {
    pub name: String,
    pub mime: String,
    pub size: usize,
}

impl TaskView {
    fn new(record: TaskRecord, now: DateTime<Utc>) -> Self {
        Self {
            status: record.status(now),
            missing: record.missing(),
            attachment: record.attachment.as_ref().map(|a| AttachmentInfo {
                name: a.name.clone(),
                mime: a.mime.clone(),
                size: a.data.len(),
            }),
            id: record.id,
            targets: record.targets,
            responses: record.responses,
            task: record.payload,
            created_at: record.created_at,
            deadline: record.deadline,
        }
    }
}

/// List retained tasks, newest first
#[utoipa::path(
    get,
    path = "/api/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Retained tasks", body = [TaskView]),
    )
)]
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskView>> {
    let now = Utc::now();
    let tasks = state
        .tasks
        .list()
        .await
        .into_iter()
        .map(|r| TaskView::new(r, now))
        .collect();
    Json(tasks)
}

/// Get one task with its responses so far
#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task", body = TaskView),
        (status = 404, description = "Unknown or purged task")
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<TaskView>> {
    let record = state
        .tasks
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Task not found: {}", id)))?;
    Ok(Json(TaskView::new(record, Utc::now())))
}
