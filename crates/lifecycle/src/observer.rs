// Lifecycle Observers
//
// Components never touch process-wide logging setup. Each controller, session
// and heartbeat supervisor receives an observer at construction and reports
// its lifecycle through it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{HeartbeatError, ShutdownError};
use crate::worker::{SessionState, ShutdownOutcome};

// ============================================================================
// LifecycleObserver Trait
// ============================================================================

/// Receives lifecycle notifications from the restart loop and heartbeat supervisors.
///
/// All methods have empty default bodies so implementations only override
/// what they care about. Methods are synchronous because heartbeat timer
/// threads call them outside of any async runtime; keep them fast.
pub trait LifecycleObserver: Send + Sync {
    /// A restart cycle is about to start its session
    fn on_cycle_started(&self, _cycle: u64, _queue: &str, _concurrency_limit: usize) {}

    /// The session of `cycle` will be recycled after `delay`
    fn on_restart_scheduled(&self, _cycle: u64, _delay: Duration) {}

    /// The session of `cycle` entered `state` at `at`
    fn on_session_state(&self, _cycle: u64, _state: SessionState, _at: Instant) {}

    /// Graceful shutdown was requested for the session of `cycle`
    fn on_shutdown_requested(&self, _cycle: u64, _timeout: Duration) {}

    /// The session of `cycle` finished stopping
    fn on_shutdown_finished(
        &self,
        _cycle: u64,
        _result: &Result<ShutdownOutcome, ShutdownError>,
    ) {
    }

    /// Heartbeating started for a work item
    fn on_heartbeat_started(&self, _work_item_id: &str, _interval: Duration) {}

    /// One liveness signal was emitted (`sequence` starts at 1)
    fn on_heartbeat_sent(&self, _work_item_id: &str, _sequence: u64) {}

    /// Liveness emission failed; the work item will fail with it
    fn on_heartbeat_failed(&self, _work_item_id: &str, _error: &HeartbeatError) {}

    /// Heartbeating stopped after `sent` signals
    fn on_heartbeat_stopped(&self, _work_item_id: &str, _sent: u64) {}

    /// An external interrupt reached the controller
    ///
    /// Hook for diagnostics such as task dumps.
    fn on_interrupt(&self) {}

    /// Human-readable name for logging/debugging.
    fn name(&self) -> &'static str {
        "LifecycleObserver"
    }
}

/// Shared observer handle passed between components
pub type ObserverRef = Arc<dyn LifecycleObserver>;

// ============================================================================
// NoopObserver
// ============================================================================

/// Observer that ignores every notification.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn name(&self) -> &'static str {
        "NoopObserver"
    }
}

// ============================================================================
// TracingObserver
// ============================================================================

/// Observer that reports through `tracing`.
///
/// Every line carries the restart cycle or the work item id.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl TracingObserver {
    /// Shared handle to a tracing observer
    pub fn shared() -> ObserverRef {
        Arc::new(Self)
    }
}

impl LifecycleObserver for TracingObserver {
    fn on_cycle_started(&self, cycle: u64, queue: &str, concurrency_limit: usize) {
        info!(cycle, queue, concurrency_limit, "Starting worker session");
    }

    fn on_restart_scheduled(&self, cycle: u64, delay: Duration) {
        debug!(cycle, delay_ms = delay.as_millis() as u64, "Restart scheduled");
    }

    fn on_session_state(&self, cycle: u64, state: SessionState, _at: Instant) {
        debug!(cycle, state = ?state, "Session state changed");
    }

    fn on_shutdown_requested(&self, cycle: u64, timeout: Duration) {
        info!(
            cycle,
            timeout_ms = timeout.as_millis() as u64,
            "Shutting down worker gracefully"
        );
    }

    fn on_shutdown_finished(&self, cycle: u64, result: &Result<ShutdownOutcome, ShutdownError>) {
        match result {
            Ok(ShutdownOutcome::Cancelled) => {
                info!(cycle, "Worker shutdown cancelled by interrupt (expected)")
            }
            Ok(outcome) => info!(cycle, outcome = ?outcome, "Worker shutdown complete"),
            Err(e) => warn!(cycle, error = %e, "Error during shutdown"),
        }
    }

    fn on_heartbeat_started(&self, work_item_id: &str, interval: Duration) {
        info!(
            work_item_id,
            interval_ms = interval.as_millis() as u64,
            "Starting heartbeat"
        );
    }

    fn on_heartbeat_sent(&self, work_item_id: &str, sequence: u64) {
        info!(work_item_id, sequence, "Heartbeat sent");
    }

    fn on_heartbeat_failed(&self, work_item_id: &str, error: &HeartbeatError) {
        error!(work_item_id, error = %error, "Heartbeat error");
    }

    fn on_heartbeat_stopped(&self, work_item_id: &str, sent: u64) {
        info!(work_item_id, sent, "Stopping heartbeat");
    }

    fn on_interrupt(&self) {
        info!("Interrupt received, cancelling restart loop");
    }

    fn name(&self) -> &'static str {
        "TracingObserver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_names() {
        assert_eq!(NoopObserver.name(), "NoopObserver");
        assert_eq!(TracingObserver.name(), "TracingObserver");
    }

    #[test]
    fn test_noop_observer_accepts_everything() {
        let observer: ObserverRef = Arc::new(NoopObserver);
        observer.on_cycle_started(1, "activities", 1);
        observer.on_heartbeat_sent("item-1", 1);
        observer.on_heartbeat_failed("item-1", &HeartbeatError::ChannelClosed);
        observer.on_interrupt();
    }
}
