//! Worker process configuration
//!
//! Defaults mirror the standalone worker: one slot, a 1s restart interval and
//! a 5s graceful shutdown timeout against the `activities` queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::WorkerOptions;
use crate::error::ControllerError;

/// Default engine address
pub const DEFAULT_ENGINE_ADDRESS: &str = "memory://local";

/// Default queue name
pub const DEFAULT_QUEUE: &str = "activities";

/// Configuration of one restart controller (and of its fan-out)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Orchestration engine address (e.g., "memory://local")
    pub engine_address: String,

    /// Queue every session binds to
    pub queue_name: String,

    /// Maximum simultaneously executing work items per session
    pub concurrency_limit: usize,

    /// Base delay between session start and its recycle (jittered ±10%)
    #[serde(with = "duration_millis")]
    pub restart_interval: Duration,

    /// Hard upper bound on draining in-flight work at recycle
    #[serde(with = "duration_millis")]
    pub graceful_shutdown_timeout: Duration,

    /// Number of isolated sibling processes
    pub workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine_address: DEFAULT_ENGINE_ADDRESS.to_string(),
            queue_name: DEFAULT_QUEUE.to_string(),
            concurrency_limit: 1,
            restart_interval: Duration::from_secs(1),
            graceful_shutdown_timeout: Duration::from_secs(5),
            workers: 1,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `ENGINE_ADDRESS`: Engine address (default: "memory://local")
    /// - `TASK_QUEUE`: Queue name (default: "activities")
    /// - `MAX_CONCURRENT_ACTIVITIES`: Concurrency limit (default: 1)
    /// - `RESTART_INTERVAL_SECS`: Restart interval in seconds (default: 1.0)
    /// - `GRACEFUL_SHUTDOWN_TIMEOUT_SECS`: Graceful shutdown timeout in seconds (default: 5.0)
    /// - `WORKER_PROCESSES`: Number of sibling processes (default: 1)
    pub fn from_env() -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let mut config = Self {
            engine_address: std::env::var("ENGINE_ADDRESS").unwrap_or(defaults.engine_address),
            queue_name: std::env::var("TASK_QUEUE").unwrap_or(defaults.queue_name),
            ..defaults
        };

        if let Some(limit) = env_parse::<usize>("MAX_CONCURRENT_ACTIVITIES")? {
            config = config.with_concurrency_limit(limit);
        }
        if let Some(secs) = env_parse::<f64>("RESTART_INTERVAL_SECS")? {
            config.restart_interval = duration_from_secs("RESTART_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = env_parse::<f64>("GRACEFUL_SHUTDOWN_TIMEOUT_SECS")? {
            config.graceful_shutdown_timeout =
                duration_from_secs("GRACEFUL_SHUTDOWN_TIMEOUT_SECS", secs)?;
        }
        if let Some(workers) = env_parse::<usize>("WORKER_PROCESSES")? {
            config = config.with_workers(workers);
        }

        Ok(config)
    }

    /// Set the engine address
    pub fn with_engine_address(mut self, address: impl Into<String>) -> Self {
        self.engine_address = address.into();
        self
    }

    /// Set the queue name
    pub fn with_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = queue.into();
        self
    }

    /// Set the concurrency limit (at least 1)
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Set the restart interval
    pub fn with_restart_interval(mut self, interval: Duration) -> Self {
        self.restart_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    /// Set the number of sibling processes (at least 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Check the configuration before any session is started
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.queue_name.trim().is_empty() {
            return Err(ControllerError::Config("queue name must not be empty".into()));
        }
        if self.engine_address.trim().is_empty() {
            return Err(ControllerError::Config(
                "engine address must not be empty".into(),
            ));
        }
        if self.restart_interval.is_zero() {
            return Err(ControllerError::Config(
                "restart interval must be positive".into(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(ControllerError::Config(
                "concurrency limit must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ControllerError::Config(
                "worker count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Queue binding for each session
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions::new(self.queue_name.clone(), self.concurrency_limit)
    }
}

/// Convert a user-supplied number of seconds into a duration
///
/// Rejects negative, NaN and infinite values.
pub fn duration_from_secs(name: &str, secs: f64) -> Result<Duration, ControllerError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ControllerError::Config(format!(
            "{name} must be a finite, non-negative number of seconds, got {secs}"
        ))
    })
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ControllerError::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
