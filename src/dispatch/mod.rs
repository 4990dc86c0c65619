//! Scatter/gather task dispatch
//!
//! The [`Dispatcher`] picks targets from the registry, records a task in the
//! [`TaskStore`], fans the task out over peer connections and collects
//! results until every target answered or the deadline passed.

mod coordinator;
mod store;

pub use coordinator::{DispatchLimits, Dispatcher};
pub use store::{RecordOutcome, TaskHandle, TaskRecord, TaskStatus, TaskStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("no registered peers match the requested targets")]
    NoTargets,

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Binary blob delivered alongside a task. Never inspected.
#[derive(Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// `None` broadcasts to every registered peer
    pub targets: Option<Vec<String>>,
    pub payload: Value,
    pub attachment: Option<Attachment>,
    /// Falls back to the configured default when absent
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub task_id: String,
    pub sent_to: Vec<String>,
    #[schema(value_type = Object)]
    pub responses: BTreeMap<String, Value>,
    pub missing: Vec<String>,
}
