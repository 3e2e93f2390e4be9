//! Restart loop controller
//!
//! Runs worker sessions back to back, forever:
//!
//! ```text
//!            start                 jittered sleep              shutdown(grace)
//! NoSession ───────► Running ─────────────────────► ShuttingDown ───────────────► NoSession
//!                       │                                 │        drained/forced     │
//!                       └──────── interrupt ──────────────┴──► Terminated             │
//!                                                                                     ▼
//!                                                                               next cycle
//! ```
//!
//! Sessions never overlap: cycle `n + 1` starts only after the session of
//! cycle `n` is Stopped. Shutdown failures are reported to the observer and
//! the loop moves on. Only cancellation ends [`RestartController::run_forever`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::jitter::RestartJitter;
use super::session::WorkerSession;
use crate::config::WorkerConfig;
use crate::engine::{EngineHandle, HandlerRegistry, WorkerOptions};
use crate::observer::{ObserverRef, TracingObserver};

/// How a single restart cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Session stopped (drained, forced or failed); the loop continues
    Recycled,
    /// External interrupt; the loop ends
    Interrupted,
}

/// Drives periodic graceful restarts of a worker bound to one queue
pub struct RestartController {
    engine: Arc<dyn EngineHandle>,
    handlers: HandlerRegistry,
    options: WorkerOptions,
    restart_interval: Duration,
    graceful_shutdown_timeout: Duration,
    jitter: RestartJitter,
    observer: ObserverRef,
    cycles: AtomicU64,
}

impl RestartController {
    /// Create a controller from a worker configuration
    pub fn new(
        engine: Arc<dyn EngineHandle>,
        handlers: HandlerRegistry,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            engine,
            handlers,
            options: config.worker_options(),
            restart_interval: config.restart_interval,
            graceful_shutdown_timeout: config.graceful_shutdown_timeout,
            jitter: RestartJitter::default(),
            observer: TracingObserver::shared(),
            cycles: AtomicU64::new(0),
        }
    }

    /// Report lifecycle to `observer` instead of `tracing`
    pub fn with_observer(mut self, observer: ObserverRef) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Number of cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run restart cycles until `cancel` fires
    ///
    /// Returns the number of cycles started. There is no other exit: every
    /// session-level failure is reported and followed by a fresh session.
    #[instrument(skip(self, cancel), fields(queue = %self.options.queue_name))]
    pub async fn run_forever(&self, cancel: CancellationToken) -> u64 {
        info!(
            queue = %self.options.queue_name,
            concurrency_limit = self.options.concurrency_limit,
            restart_interval_ms = self.restart_interval.as_millis() as u64,
            graceful_shutdown_timeout_ms = self.graceful_shutdown_timeout.as_millis() as u64,
            "Restart loop started"
        );

        while !cancel.is_cancelled() {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            if self.run_cycle(cycle, &cancel).await == CycleOutcome::Interrupted {
                break;
            }
        }

        let cycles = self.cycles();
        info!(cycles, "Restart loop stopped");
        cycles
    }

    /// Run one cycle: start, sleep with jitter, shut down
    pub async fn run_cycle(&self, cycle: u64, cancel: &CancellationToken) -> CycleOutcome {
        if cancel.is_cancelled() {
            return CycleOutcome::Interrupted;
        }

        self.observer
            .on_cycle_started(cycle, &self.options.queue_name, self.options.concurrency_limit);

        let started = WorkerSession::start(
            &self.engine,
            self.options.clone(),
            self.handlers.clone(),
            cycle,
            self.observer.clone(),
        )
        .await;

        let mut session = match started {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(cycle, error = %e, "Failed to start worker session, retrying next cycle");
                None
            }
        };

        let delay = self.jitter.apply(self.restart_interval);
        self.observer.on_restart_scheduled(cycle, delay);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                self.interrupt(cycle, session.as_mut()).await;
                return CycleOutcome::Interrupted;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(mut session) = session else {
            return CycleOutcome::Recycled;
        };

        self.observer
            .on_shutdown_requested(cycle, self.graceful_shutdown_timeout);

        let stopped = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            result = session.shutdown(self.graceful_shutdown_timeout) => Some(result),
        };

        match stopped {
            Some(result) => {
                self.observer.on_shutdown_finished(cycle, &result);
                CycleOutcome::Recycled
            }
            None => {
                self.interrupt(cycle, Some(&mut session)).await;
                CycleOutcome::Interrupted
            }
        }
    }

    async fn interrupt(&self, cycle: u64, session: Option<&mut WorkerSession>) {
        self.observer.on_interrupt();
        if let Some(session) = session {
            let outcome = session.terminate().await;
            self.observer.on_shutdown_finished(cycle, &Ok(outcome));
        }
    }
}

impl std::fmt::Debug for RestartController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartController")
            .field("engine", &self.engine.address())
            .field("options", &self.options)
            .field("restart_interval", &self.restart_interval)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .field("observer", &self.observer.name())
            .field("cycles", &self.cycles())
            .finish()
    }
}
