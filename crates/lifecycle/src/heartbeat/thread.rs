// Timer-thread heartbeat strategy
//
// Work runs on a worker thread; a named OS thread wakes every interval and
// emits one signal. Stop is a channel disconnect, so the timer never sleeps
// past the end of the work or past the drop of its owner.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use super::{settle, HeartbeatContext};
use crate::engine::ContextRef;
use crate::error::{HeartbeatError, WorkItemError};
use crate::observer::ObserverRef;

/// Run `work` on the current thread while a timer thread emits signals
///
/// Blocks until the work returns and the timer thread has been joined. Items
/// without a heartbeat timeout run the work directly.
pub fn supervise_blocking<F, T>(
    item: &ContextRef,
    observer: &ObserverRef,
    work: F,
) -> Result<T, WorkItemError>
where
    F: FnOnce() -> Result<T, WorkItemError>,
{
    match HeartbeatContext::for_item(item.clone(), observer.clone()) {
        Some(context) => run_with_timer(&context, work),
        None => work(),
    }
}

pub(super) fn run_with_timer<F, T>(
    context: &Arc<HeartbeatContext>,
    work: F,
) -> Result<T, WorkItemError>
where
    F: FnOnce() -> Result<T, WorkItemError>,
{
    let timer = TimerThread::start(context.clone())?;

    let outcome = work();
    let beats = timer.stop();

    settle(beats, outcome)
}

/// Repeating timer on a dedicated OS thread
///
/// Joined on [`TimerThread::stop`] or on drop, whichever comes first. Whoever
/// owns the timer decides how long signals flow: a dropped owner means no
/// further signals.
pub(super) struct TimerThread {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<Result<(), HeartbeatError>>>,
}

impl TimerThread {
    /// Spawn the timer, mapping a spawn failure to a retryable item error
    pub(super) fn start(context: Arc<HeartbeatContext>) -> Result<Self, WorkItemError> {
        Self::spawn(context).map_err(|e| {
            WorkItemError::retryable(format!("failed to spawn heartbeat timer: {e}"))
        })
    }

    fn spawn(context: Arc<HeartbeatContext>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let name = format!("heartbeat-{}", context.work_item_id());

        let handle = thread::Builder::new().name(name).spawn(move || {
            let _signaling = context.signaling();
            loop {
                match stop_rx.recv_timeout(context.interval()) {
                    Err(RecvTimeoutError::Timeout) => context.beat()?,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                }
            }
        })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for it to exit
    ///
    /// Returns the first emission error, if any.
    pub(super) fn stop(mut self) -> Result<(), HeartbeatError> {
        self.halt()
    }

    fn halt(&mut self) -> Result<(), HeartbeatError> {
        // Disconnect wakes the timer immediately.
        self.stop_tx.take();

        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(HeartbeatError::Rejected("heartbeat timer panicked".to_string()))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            warn!(error = %e, "Heartbeat timer stopped with error after its owner went away");
        }
    }
}
