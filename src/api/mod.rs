pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod openapi;
pub mod peers;
pub mod tasks;
pub mod ws;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::{Dispatcher, TaskStore};
use crate::events::EventBus;
use crate::registry::{LivenessMonitor, PeerRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: PeerRegistry,
    pub tasks: TaskStore,
    pub dispatcher: Dispatcher,
    pub events: EventBus,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let events = EventBus::new(config.event_buffer);
        let registry = PeerRegistry::new(events.clone());
        let tasks = TaskStore::new(events.clone());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            tasks.clone(),
            events.clone(),
            config.dispatch_limits(),
        );

        Self {
            config,
            registry,
            tasks,
            dispatcher,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Start the liveness monitor and the task janitor
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let liveness =
            LivenessMonitor::new(self.registry.clone(), self.config.liveness_interval()).spawn();
        let janitor = self.tasks.clone().spawn_janitor(
            self.config.task_sweep_interval(),
            self.config.task_retention(),
        );
        vec![liveness, janitor]
    }
}
