//! Heartbeat supervision for long-running work items
//!
//! This module provides:
//! - [`LivenessSupervisor`] - runs one unit of work while emitting liveness signals
//! - [`HeartbeatStrategy`] - where the signaling loop runs (timer thread or cooperative task)
//! - [`HeartbeatContext`] - per-item signaling state shared by both strategies
//!
//! # Cadence
//!
//! ```text
//! declared timeout T ──► interval T/2
//!
//! t=0        T/2        T         3T/2 ...   work returns
//!  │ dispatch │ signal 1 │ signal 2 │ ...        │ loop stopped + joined
//!  └──────────┴──────────┴──────────┴────────────┴──► outcome reported
//! ```
//!
//! The first signal waits one full interval: the engine saw the item alive at
//! dispatch. A failed emission is fatal to the item and is reported in place
//! of whatever the work returned. No signal is ever emitted after the
//! supervisor returns.
//!
//! # Example
//!
//! ```ignore
//! use turnover_lifecycle::heartbeat::{HeartbeatStrategy, LivenessSupervisor};
//!
//! let supervisor = LivenessSupervisor::new(ctx, HeartbeatStrategy::Cooperative);
//! let rows = supervisor.supervise(move || import_rows(&path)).await?;
//! ```

mod cooperative;
mod thread;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinError;

use crate::engine::ContextRef;
use crate::error::{HeartbeatError, WorkItemError};
use crate::observer::{ObserverRef, TracingObserver};

pub use thread::supervise_blocking;

/// Compute the signaling interval for a declared heartbeat timeout
///
/// Half the timeout, so one lost signal does not get the item declared dead.
/// Returns `None` when heartbeating is disabled (no timeout, or zero).
pub fn heartbeat_interval(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero()).map(|t| t / 2)
}

/// Where the signaling loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatStrategy {
    /// Work on a blocking worker thread, signals from a dedicated timer thread
    Thread,
    /// Work offloaded to the blocking pool, signals from the caller's task
    #[default]
    Cooperative,
}

/// Signaling state of one work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Loop not started yet
    Idle,
    /// Loop running
    Signaling,
    /// Loop exited and joined
    Stopped,
}

// =============================================================================
// HeartbeatContext
// =============================================================================

/// Liveness state of one in-flight work item
///
/// Exclusively owned by the supervisor of that item; never shared across
/// items.
pub struct HeartbeatContext {
    item: ContextRef,
    observer: ObserverRef,
    interval: Duration,
    sent: AtomicU64,
    state: Mutex<SignalState>,
}

impl HeartbeatContext {
    /// Build the context for an item, or `None` when it declares no timeout
    pub fn for_item(item: ContextRef, observer: ObserverRef) -> Option<Arc<Self>> {
        let interval = heartbeat_interval(item.info().heartbeat_timeout)?;
        Some(Arc::new(Self {
            item,
            observer,
            interval,
            sent: AtomicU64::new(0),
            state: Mutex::new(SignalState::Idle),
        }))
    }

    pub fn work_item_id(&self) -> &str {
        &self.item.info().id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals emitted so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SignalState {
        *self.state.lock()
    }

    /// Mark the loop as running; the returned guard marks it stopped on drop
    fn signaling(&self) -> SignalingGuard<'_> {
        *self.state.lock() = SignalState::Signaling;
        self.observer
            .on_heartbeat_started(self.work_item_id(), self.interval);
        SignalingGuard { context: self }
    }

    /// Emit one signal
    fn beat(&self) -> Result<(), HeartbeatError> {
        match self.item.heartbeat() {
            Ok(()) => {
                let sequence = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
                self.observer
                    .on_heartbeat_sent(self.work_item_id(), sequence);
                Ok(())
            }
            Err(e) => {
                self.observer.on_heartbeat_failed(self.work_item_id(), &e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for HeartbeatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatContext")
            .field("work_item_id", &self.work_item_id())
            .field("interval", &self.interval)
            .field("sent", &self.sent())
            .field("state", &self.state())
            .finish()
    }
}

struct SignalingGuard<'a> {
    context: &'a HeartbeatContext,
}

impl Drop for SignalingGuard<'_> {
    fn drop(&mut self) {
        *self.context.state.lock() = SignalState::Stopped;
        self.context
            .observer
            .on_heartbeat_stopped(self.context.work_item_id(), self.context.sent());
    }
}

/// Combine the signaling loop result with the work outcome
///
/// A heartbeat failure replaces the work's result.
fn settle<T>(
    beats: Result<(), HeartbeatError>,
    outcome: Result<T, WorkItemError>,
) -> Result<T, WorkItemError> {
    match beats {
        Err(e) => Err(e.into()),
        Ok(()) => outcome,
    }
}

fn join_failure(error: JoinError) -> WorkItemError {
    if error.is_panic() {
        WorkItemError::non_retryable(format!("work item panicked: {error}"))
    } else {
        WorkItemError::retryable("work item execution was cancelled")
    }
}

// =============================================================================
// LivenessSupervisor
// =============================================================================

/// Runs a unit of work and keeps its liveness signal flowing
///
/// Both strategies behave the same from the outside: the work's result or
/// error is returned unchanged unless a liveness emission failed, and the
/// signaling loop is stopped and joined before any method returns.
#[derive(Clone)]
pub struct LivenessSupervisor {
    item: ContextRef,
    observer: ObserverRef,
    strategy: HeartbeatStrategy,
}

impl LivenessSupervisor {
    /// Create a supervisor for one work item
    pub fn new(item: ContextRef, strategy: HeartbeatStrategy) -> Self {
        Self {
            item,
            observer: TracingObserver::shared(),
            strategy,
        }
    }

    /// Report heartbeat lifecycle to `observer` instead of `tracing`
    pub fn with_observer(mut self, observer: ObserverRef) -> Self {
        self.observer = observer;
        self
    }

    pub fn strategy(&self) -> HeartbeatStrategy {
        self.strategy
    }

    /// Signaling interval, `None` when the item declares no heartbeat timeout
    pub fn interval(&self) -> Option<Duration> {
        heartbeat_interval(self.item.info().heartbeat_timeout)
    }

    /// Run blocking `work` under supervision
    ///
    /// The work always runs on the blocking pool; the strategy decides
    /// whether signals come from a timer thread or from this task.
    pub async fn supervise<F, T>(&self, work: F) -> Result<T, WorkItemError>
    where
        F: FnOnce() -> Result<T, WorkItemError> + Send + 'static,
        T: Send + 'static,
    {
        let Some(context) = HeartbeatContext::for_item(self.item.clone(), self.observer.clone())
        else {
            return tokio::task::spawn_blocking(work)
                .await
                .unwrap_or_else(|e| Err(join_failure(e)));
        };

        match self.strategy {
            HeartbeatStrategy::Thread => {
                // The timer lives in this future: dropping it mid-work stops the
                // signals even though the blocking work itself cannot be pre-empted.
                let timer = thread::TimerThread::start(context)?;
                let outcome = tokio::task::spawn_blocking(work)
                    .await
                    .unwrap_or_else(|e| Err(join_failure(e)));
                settle(timer.stop(), outcome)
            }
            HeartbeatStrategy::Cooperative => {
                let work = async move {
                    tokio::task::spawn_blocking(work)
                        .await
                        .unwrap_or_else(|e| Err(join_failure(e)))
                };
                cooperative::run_with_signals(&context, work).await
            }
        }
    }

    /// Run async `work` under supervision
    ///
    /// The signaling loop runs next to the work inside the caller's task,
    /// whatever the configured strategy. Dropping the returned future drops
    /// the work and the loop together.
    pub async fn supervise_future<F, T>(&self, work: F) -> Result<T, WorkItemError>
    where
        F: Future<Output = Result<T, WorkItemError>>,
    {
        match HeartbeatContext::for_item(self.item.clone(), self.observer.clone()) {
            Some(context) => cooperative::run_with_signals(&context, work).await,
            None => work.await,
        }
    }

    /// Run blocking `work` on the current thread with a timer thread
    ///
    /// For callers already on a worker thread.
    pub fn supervise_blocking<F, T>(&self, work: F) -> Result<T, WorkItemError>
    where
        F: FnOnce() -> Result<T, WorkItemError>,
    {
        supervise_blocking(&self.item, &self.observer, work)
    }
}

impl std::fmt::Debug for LivenessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessSupervisor")
            .field("work_item_id", &self.item.info().id)
            .field("strategy", &self.strategy)
            .finish()
    }
}
