use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::dispatch::DispatchLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between liveness probe cycles
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    /// Collection window used when a dispatch request names none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,

    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: f64,

    /// How long a task is kept after its deadline
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,

    #[serde(default = "default_task_sweep_interval_secs")]
    pub task_sweep_interval_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_liveness_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> f64 {
    12.0
}

fn default_max_timeout_secs() -> f64 {
    120.0
}

fn default_task_retention_secs() -> u64 {
    600
}

fn default_task_sweep_interval_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_event_buffer() -> usize {
    256
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let settings: Config = config.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid configuration in environment, using defaults");
            Config::default()
        });

        Ok(settings)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn task_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.task_sweep_interval_secs.max(1))
    }

    pub fn dispatch_limits(&self) -> DispatchLimits {
        // Negative or NaN becomes zero, anything too large saturates
        let secs = |v: f64| {
            if v.is_nan() || v <= 0.0 {
                Duration::ZERO
            } else {
                Duration::try_from_secs_f64(v).unwrap_or(Duration::MAX)
            }
        };
        DispatchLimits {
            default_timeout: secs(self.default_timeout_secs),
            max_timeout: secs(self.max_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            liveness_interval_secs: default_liveness_interval_secs(),
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            task_retention_secs: default_task_retention_secs(),
            task_sweep_interval_secs: default_task_sweep_interval_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            event_buffer: default_event_buffer(),
        }
    }
}
