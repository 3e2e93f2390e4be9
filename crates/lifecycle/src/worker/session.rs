//! One running instance of a worker bound to a queue
//!
//! A session is started fire-and-forget: the engine's run loop executes on
//! its own task while the caller moves on. Shutdown requests a graceful stop
//! and waits for the run loop to exit, force-terminating it when the grace
//! period expires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::engine::{EngineHandle, HandlerRegistry, RunHandle, WorkerOptions};
use crate::error::{EngineError, ShutdownError};
use crate::observer::ObserverRef;

/// Worker session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Run loop is being launched
    Starting,
    /// Run loop is active and admitting work
    Running,
    /// No new work admitted, in-flight work draining
    ShuttingDown,
    /// Run loop exited (drained or forced)
    Stopped,
}

/// How a session stop completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// In-flight work finished within the grace period
    Drained,
    /// Session was already stopped; nothing to do
    AlreadyStopped,
    /// Stop was cut short by an external interrupt
    Cancelled,
}

/// One running worker bound to a queue
pub struct WorkerSession {
    cycle: u64,
    options: WorkerOptions,
    run: Arc<dyn RunHandle>,
    task: Option<JoinHandle<Result<(), EngineError>>>,
    state: Arc<StateCell>,
    started_at: Instant,
    stopped_at: Option<Instant>,
}

/// Session state shared with the run-loop task
struct StateCell {
    cycle: u64,
    tx: watch::Sender<SessionState>,
    observer: ObserverRef,
}

impl StateCell {
    fn set(&self, state: SessionState) -> Instant {
        let at = Instant::now();
        self.tx.send_replace(state);
        self.observer.on_session_state(self.cycle, state, at);
        at
    }

    /// Starting -> Running, unless shutdown already moved the session on
    fn mark_running(&self) {
        let moved = self.tx.send_if_modified(|state| {
            if *state == SessionState::Starting {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        if moved {
            self.observer
                .on_session_state(self.cycle, SessionState::Running, Instant::now());
        }
    }
}

impl WorkerSession {
    /// Bind a worker to the queue and launch its run loop
    ///
    /// Returns as soon as the run loop is spawned; it does not wait for the
    /// loop to become active.
    #[instrument(skip(engine, handlers, observer), fields(queue = %options.queue_name))]
    pub async fn start(
        engine: &Arc<dyn EngineHandle>,
        options: WorkerOptions,
        handlers: HandlerRegistry,
        cycle: u64,
        observer: ObserverRef,
    ) -> Result<Self, EngineError> {
        let (tx, _) = watch::channel(SessionState::Starting);
        let state = Arc::new(StateCell { cycle, tx, observer });
        let started_at = state.set(SessionState::Starting);

        let run = match engine.start_worker(options.clone(), handlers).await {
            Ok(run) => run,
            Err(e) => {
                state.set(SessionState::Stopped);
                return Err(e);
            }
        };

        let task = {
            let run = run.clone();
            let state = state.clone();
            tokio::spawn(async move {
                state.mark_running();
                run.run().await
            })
        };

        Ok(Self {
            cycle,
            options,
            run,
            task: Some(task),
            state,
            started_at,
            stopped_at: None,
        })
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.tx.subscribe()
    }

    /// When the session entered Starting
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the session entered Stopped, if it has
    pub fn stopped_at(&self) -> Option<Instant> {
        self.stopped_at
    }

    /// Stop admitting work and wait up to `grace` for in-flight work
    ///
    /// The run loop is aborted when the grace period expires. The session is
    /// Stopped when this returns, whatever the result; calling it again is a
    /// no-op returning [`ShutdownOutcome::AlreadyStopped`].
    #[instrument(skip(self), fields(cycle = self.cycle))]
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ShutdownOutcome, ShutdownError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(ShutdownOutcome::AlreadyStopped);
        };

        if *self.state.tx.borrow() != SessionState::ShuttingDown {
            self.state.set(SessionState::ShuttingDown);
            self.run.shutdown();
        }

        let result = match tokio::time::timeout(grace, &mut *task).await {
            Ok(joined) => settle_join(joined),
            Err(_) => {
                debug!(cycle = self.cycle, "Grace period expired, aborting run loop");
                task.abort();
                // Wait for teardown so nothing from this session outlives it.
                let _ = (&mut *task).await;
                Err(ShutdownError::GraceExpired { timeout: grace })
            }
        };

        self.task = None;
        self.stopped_at = Some(self.state.set(SessionState::Stopped));
        result
    }

    /// Tear the run loop down without a grace period
    ///
    /// Used when an external interrupt cancels the controller, including in
    /// the middle of [`WorkerSession::shutdown`]. Waits for the aborted task
    /// to exit.
    pub async fn terminate(&mut self) -> ShutdownOutcome {
        let Some(task) = self.task.as_mut() else {
            return ShutdownOutcome::AlreadyStopped;
        };

        self.run.shutdown();
        task.abort();
        let _ = (&mut *task).await;

        self.task = None;
        self.stopped_at = Some(self.state.set(SessionState::Stopped));
        ShutdownOutcome::Cancelled
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.run.shutdown();
            task.abort();
        }
    }
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("cycle", &self.cycle)
            .field("queue", &self.options.queue_name)
            .field("concurrency_limit", &self.options.concurrency_limit)
            .field("state", &self.state())
            .finish()
    }
}

fn settle_join(
    joined: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> Result<ShutdownOutcome, ShutdownError> {
    match joined {
        Ok(Ok(())) => Ok(ShutdownOutcome::Drained),
        Ok(Err(e)) => Err(ShutdownError::RunFailed(e)),
        Err(e) if e.is_panic() => Err(ShutdownError::Panicked(e.to_string())),
        Err(e) => Err(ShutdownError::Panicked(format!("run loop cancelled: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::{MemoryEngine, WorkItem, WorkItemStatus};
    use crate::observer::NoopObserver;

    fn sleeper_handlers() -> HandlerRegistry {
        HandlerRegistry::new().with("sleep", |_ctx, input| async move {
            let secs = input["secs"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(json!({"slept": secs}))
        })
    }

    async fn start_session(engine: &MemoryEngine) -> WorkerSession {
        let handle: Arc<dyn EngineHandle> = Arc::new(engine.clone());
        WorkerSession::start(
            &handle,
            WorkerOptions::new("activities", 1),
            sleeper_handlers(),
            1,
            Arc::new(NoopObserver),
        )
        .await
        .unwrap()
    }

    async fn wait_until_running(engine: &MemoryEngine) {
        while engine.count_with_status(WorkItemStatus::Running) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_becomes_running() {
        let engine = MemoryEngine::new("session");
        let mut session = start_session(&engine).await;

        let mut states = session.subscribe();
        states
            .wait_for(|s| *s == SessionState::Running)
            .await
            .unwrap();

        let outcome = session.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_item() {
        let engine = MemoryEngine::new("drain");
        let id = engine.submit("activities", WorkItem::new("sleep", json!({"secs": 2})));
        let mut session = start_session(&engine).await;
        wait_until_running(&engine).await;

        let requested = Instant::now();
        let outcome = session.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Drained);
        let took = session.stopped_at().unwrap() - requested;
        assert!(took <= Duration::from_secs(2), "took {took:?}");
        assert!(took >= Duration::from_millis(1900), "took {took:?}");
        assert_eq!(engine.record(&id).unwrap().status, WorkItemStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_forces_after_grace() {
        let engine = MemoryEngine::new("force");
        let id = engine.submit("activities", WorkItem::new("sleep", json!({"secs": 8})));
        let mut session = start_session(&engine).await;
        wait_until_running(&engine).await;

        let requested = Instant::now();
        let result = session.shutdown(Duration::from_secs(5)).await;

        assert!(matches!(result, Err(ShutdownError::GraceExpired { .. })));
        assert_eq!(session.stopped_at().unwrap() - requested, Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::Stopped);

        // torn-down item goes back to the queue once its task is dropped
        tokio::time::sleep(Duration::from_millis(10)).await;
        let record = engine.record(&id).unwrap();
        assert_eq!(record.status, WorkItemStatus::Pending);
        assert_eq!(engine.pending_count("activities"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let engine = MemoryEngine::new("idempotent");
        let mut session = start_session(&engine).await;

        assert_eq!(
            session.shutdown(Duration::from_secs(1)).await.unwrap(),
            ShutdownOutcome::Drained
        );
        let stopped_at = session.stopped_at();

        assert_eq!(
            session.shutdown(Duration::from_secs(1)).await.unwrap(),
            ShutdownOutcome::AlreadyStopped
        );
        assert_eq!(session.terminate().await, ShutdownOutcome::AlreadyStopped);
        assert_eq!(session.stopped_at(), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_reports_cancelled() {
        let engine = MemoryEngine::new("terminate");
        engine.submit("activities", WorkItem::new("sleep", json!({"secs": 30})));
        let mut session = start_session(&engine).await;
        wait_until_running(&engine).await;

        assert_eq!(session.terminate().await, ShutdownOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_start_fails_on_empty_queue() {
        let engine: Arc<dyn EngineHandle> = Arc::new(MemoryEngine::new("empty"));
        let result = WorkerSession::start(
            &engine,
            WorkerOptions::new("", 1),
            HandlerRegistry::new(),
            1,
            Arc::new(NoopObserver),
        )
        .await;

        assert!(matches!(result, Err(EngineError::EmptyQueueName)));
    }
}
