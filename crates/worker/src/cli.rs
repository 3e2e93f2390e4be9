// Command-line surface
//
// Decision: clap derive with env fallbacks; a .env file is loaded before parsing.
// Decision: Fan-out re-executes this binary, so every flag must round-trip through sibling_args.

use clap::Parser;
use turnover_lifecycle::config::{
    duration_from_secs, WorkerConfig, DEFAULT_ENGINE_ADDRESS, DEFAULT_QUEUE,
};
use turnover_lifecycle::error::ControllerError;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "turnover-worker")]
#[command(about = "Queue worker that drains and restarts itself on a jittered interval")]
#[command(version)]
pub struct Cli {
    /// Seconds between graceful restarts (jittered ±10%)
    #[arg(env = "RESTART_INTERVAL_SECS", default_value_t = 1.0)]
    pub restart_interval: f64,

    /// Seconds in-flight work may take to drain before a forced stop
    #[arg(long, env = "GRACEFUL_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5.0)]
    pub graceful_shutdown_timeout: f64,

    /// Number of isolated worker processes
    #[arg(short = 'N', long, env = "WORKER_PROCESSES", default_value_t = 1)]
    pub workers: usize,

    /// Queue to consume from
    #[arg(long, env = "TASK_QUEUE", default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Maximum concurrently executing work items per session
    #[arg(long, env = "MAX_CONCURRENT_ACTIVITIES", default_value_t = 1)]
    pub concurrency: usize,

    /// Orchestration engine address
    #[arg(long, env = "ENGINE_ADDRESS", default_value = DEFAULT_ENGINE_ADDRESS)]
    pub engine_address: String,

    /// Submit a demo work item every N seconds (in-memory engine only)
    #[arg(long, env = "FEED_INTERVAL_SECS")]
    pub feed_interval: Option<f64>,
}

impl Cli {
    /// Validated worker configuration
    pub fn worker_config(&self) -> Result<WorkerConfig, ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::Config("--workers must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(ControllerError::Config(
                "--concurrency must be at least 1".into(),
            ));
        }

        let config = WorkerConfig::default()
            .with_engine_address(self.engine_address.clone())
            .with_queue_name(self.queue.clone())
            .with_concurrency_limit(self.concurrency)
            .with_restart_interval(duration_from_secs("restart interval", self.restart_interval)?)
            .with_graceful_shutdown_timeout(duration_from_secs(
                "--graceful-shutdown-timeout",
                self.graceful_shutdown_timeout,
            )?)
            .with_workers(self.workers);

        config.validate()?;
        Ok(config)
    }

    /// Feeder period, if one was requested
    pub fn feed_period(&self) -> Result<Option<std::time::Duration>, ControllerError> {
        match self.feed_interval {
            None => Ok(None),
            Some(secs) => {
                let period = duration_from_secs("--feed-interval", secs)?;
                if period.is_zero() {
                    return Err(ControllerError::Config(
                        "--feed-interval must be positive".into(),
                    ));
                }
                Ok(Some(period))
            }
        }
    }

    /// Arguments for one sibling process in fan-out mode
    pub fn sibling_args(&self) -> Vec<String> {
        let mut args = vec![
            self.restart_interval.to_string(),
            "--graceful-shutdown-timeout".to_string(),
            self.graceful_shutdown_timeout.to_string(),
            "--workers".to_string(),
            "1".to_string(),
            "--queue".to_string(),
            self.queue.clone(),
            "--concurrency".to_string(),
            self.concurrency.to_string(),
            "--engine-address".to_string(),
            self.engine_address.clone(),
        ];
        if let Some(secs) = self.feed_interval {
            args.push("--feed-interval".to_string());
            args.push(secs.to_string());
        }
        args
    }
}
