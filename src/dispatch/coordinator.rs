use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::{Attachment, DispatchError, DispatchRequest, DispatchResult, TaskStore};
use crate::events::{Event, EventBus};
use crate::protocol::{FileAttachment, OutboundMessage};
use crate::registry::PeerRegistry;

/// Bounds applied to a caller-supplied collection timeout
#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(12),
            max_timeout: Duration::from_secs(120),
        }
    }
}

impl DispatchLimits {
    /// Resolve a requested timeout in seconds, clamping to the maximum
    pub fn resolve(&self, requested: Option<f64>) -> Result<Duration, DispatchError> {
        let Some(secs) = requested else {
            return Ok(self.default_timeout.min(self.max_timeout));
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(DispatchError::InvalidTimeout(format!(
                "timeoutSeconds must be a non-negative number, got {}",
                secs
            )));
        }
        Ok(Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_timeout)
            .min(self.max_timeout))
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: PeerRegistry,
    tasks: TaskStore,
    events: EventBus,
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(
        registry: PeerRegistry,
        tasks: TaskStore,
        events: EventBus,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            registry,
            tasks,
            events,
            limits,
        }
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Fan a task out to the selected peers and gather what comes back
    /// before the deadline.
    #[instrument(skip_all, fields(task_id = tracing::field::Empty))]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let timeout = self.limits.resolve(request.timeout_secs)?;
        let targets = self.select(request.targets.as_deref()).await;
        if targets.is_empty() {
            debug!("Dispatch rejected: no targets");
            return Err(DispatchError::NoTargets);
        }

        let started = std::time::Instant::now();
        let mut handle = self
            .tasks
            .create(
                targets.clone(),
                request.payload.clone(),
                request.attachment.clone(),
                timeout,
            )
            .await;
        tracing::Span::current().record("task_id", handle.id.as_str());
        metrics::increment_counter!("peerhub_dispatches_total");

        let sent = self
            .fan_out(
                &handle.id,
                &request.payload,
                request.attachment.as_ref(),
                &targets,
            )
            .await;
        info!(
            targets = targets.len(),
            sent,
            timeout_ms = timeout.as_millis() as u64,
            "Task dispatched"
        );

        handle.wait().await;

        let responses = match self.tasks.get(&handle.id).await {
            Some(record) => record.responses,
            None => {
                warn!("Task purged before collection finished, using responses seen so far");
                handle.responses()
            }
        };
        let missing: Vec<String> = targets
            .iter()
            .filter(|id| !responses.contains_key(*id))
            .cloned()
            .collect();

        metrics::histogram!(
            "peerhub_dispatch_duration_seconds",
            started.elapsed().as_secs_f64()
        );
        info!(
            responded = responses.len(),
            missing = missing.len(),
            "Task collection finished"
        );
        self.events.emit(Event::TaskCompleted {
            task_id: handle.id.clone(),
            responded: responses.len(),
            missing: missing.len(),
        });

        Ok(DispatchResult {
            task_id: handle.id,
            sent_to: targets,
            responses,
            missing,
        })
    }

    /// Registered ids, optionally intersected with the requested ones
    async fn select(&self, requested: Option<&[String]>) -> Vec<String> {
        let registered = self.registry.ids().await;
        match requested {
            None => registered,
            Some(requested) => {
                let wanted: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
                registered
                    .into_iter()
                    .filter(|id| wanted.contains(id.as_str()))
                    .collect()
            }
        }
    }

    /// Send the task to every target with an open connection. Returns how
    /// many peers it was handed to.
    async fn fan_out(
        &self,
        task_id: &str,
        payload: &Value,
        attachment: Option<&Attachment>,
        targets: &[String],
    ) -> usize {
        let message = OutboundMessage::Task {
            task_id: task_id.to_string(),
            task: payload.clone(),
            file: attachment.map(FileAttachment::from),
        };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode task message");
                return 0;
            }
        };

        let mut sent = 0;
        for (peer_id, conn) in self.registry.connections(targets).await {
            let Some(conn) = conn.filter(|c| c.is_open()) else {
                debug!(peer_id = %peer_id, "Skipping peer without open connection");
                continue;
            };
            match conn.send_text(text.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer_id = %peer_id, error = %e, "Failed to deliver task"),
            }
        }
        sent
    }
}
