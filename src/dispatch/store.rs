//! In-memory task store
//!
//! Each task carries a `watch` channel holding its responses so a waiting
//! dispatcher wakes as soon as a result lands instead of polling, and still
//! sees what arrived if the record is purged while it waits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Attachment;
use crate::events::{Event, EventBus};

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Complete,
    Expired,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Snapshot of a task
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub targets: Vec<String>,
    pub responses: BTreeMap<String, Value>,
    pub payload: Value,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl TaskRecord {
    pub fn missing(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|id| !self.responses.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.responses.len() >= self.targets.len()
    }

    pub fn status(&self, now: DateTime<Utc>) -> TaskStatus {
        if self.is_complete() {
            TaskStatus::Complete
        } else if now >= self.deadline {
            TaskStatus::Expired
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The peer already answered; the first answer is kept
    Duplicate,
    UnknownTask,
    NotTargeted,
}

struct TaskEntry {
    record: TaskRecord,
    progress: watch::Sender<BTreeMap<String, Value>>,
}

/// Returned by [`TaskStore::create`]; waits for the task's collection window
pub struct TaskHandle {
    pub id: String,
    pub expected: usize,
    pub deadline: Instant,
    progress: watch::Receiver<BTreeMap<String, Value>>,
}

impl TaskHandle {
    /// Resolve once every target answered or the deadline passed
    pub async fn wait(&mut self) {
        let expected = self.expected;
        let all_in = self.progress.wait_for(|responses| responses.len() >= expected);
        if tokio::time::timeout_at(self.deadline, all_in).await.is_err() {
            debug!(task_id = %self.id, "Collection window elapsed");
        }
    }

    /// Responses received so far
    pub fn responses(&self) -> BTreeMap<String, Value> {
        self.progress.borrow().clone()
    }
}

#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
    events: EventBus,
}

impl TaskStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Record a new task. The deadline runs from this call.
    pub async fn create(
        &self,
        targets: Vec<String>,
        payload: Value,
        attachment: Option<Attachment>,
        timeout: Duration,
    ) -> TaskHandle {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let wall_deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|t| created_at.checked_add_signed(t))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let (progress, progress_rx) = watch::channel(BTreeMap::new());

        let expected = targets.len();
        let record = TaskRecord {
            id: id.clone(),
            targets: targets.clone(),
            responses: BTreeMap::new(),
            payload,
            attachment,
            created_at,
            deadline: wall_deadline,
        };

        self.tasks
            .write()
            .await
            .insert(id.clone(), TaskEntry { record, progress });

        self.events.emit(Event::TaskCreated {
            task_id: id.clone(),
            targets,
        });

        TaskHandle {
            id,
            expected,
            deadline,
            progress: progress_rx,
        }
    }

    /// Store a peer's result. Only the first result per peer counts.
    pub async fn record_result(&self, task_id: &str, peer_id: &str, result: Value) -> RecordOutcome {
        let outcome = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(task_id) else {
                return RecordOutcome::UnknownTask;
            };
            let record = &mut entry.record;

            if !record.targets.iter().any(|t| t == peer_id) {
                RecordOutcome::NotTargeted
            } else if record.responses.contains_key(peer_id) {
                RecordOutcome::Duplicate
            } else {
                record.responses.insert(peer_id.to_string(), result);
                entry.progress.send_replace(record.responses.clone());
                RecordOutcome::Recorded
            }
        };

        match outcome {
            RecordOutcome::Recorded => {
                metrics::increment_counter!("peerhub_task_results_total");
                debug!(task_id = %task_id, peer_id = %peer_id, "Task result recorded");
                self.events.emit(Event::TaskResult {
                    task_id: task_id.to_string(),
                    peer_id: peer_id.to_string(),
                });
            }
            other => {
                debug!(task_id = %task_id, peer_id = %peer_id, outcome = ?other, "Task result ignored");
            }
        }
        outcome
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|e| e.record.clone())
    }

    /// All tasks, newest first
    pub async fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Drop tasks whose deadline passed more than `grace` before `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>, grace: Duration) -> Vec<String> {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let purged: Vec<String> = {
            let mut tasks = self.tasks.write().await;
            let expired: Vec<String> = tasks
                .values()
                .filter(|e| {
                    e.record
                        .deadline
                        .checked_add_signed(grace)
                        .is_some_and(|expiry| expiry < now)
                })
                .map(|e| e.record.id.clone())
                .collect();
            for id in &expired {
                tasks.remove(id);
            }
            expired
        };

        for id in &purged {
            metrics::increment_counter!("peerhub_tasks_purged_total");
            self.events.emit(Event::TaskPurged {
                task_id: id.clone(),
            });
        }
        purged
    }

    /// Periodically purge tasks past their retention window
    pub fn spawn_janitor(self, every: Duration, retention: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                every_secs = every.as_secs(),
                retention_secs = retention.as_secs(),
                "Task janitor started"
            );
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired(Utc::now(), retention).await;
                if !purged.is_empty() {
                    info!(count = purged.len(), "Purged expired tasks");
                }
            }
        })
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
