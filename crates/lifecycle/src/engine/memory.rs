//! In-memory engine for tests and standalone workers
//!
//! Provides the same worker semantics a remote engine would: bounded
//! admission, graceful drain, per-item outcomes and heartbeat bookkeeping.
//! Items torn down by a forced stop are redelivered with the next attempt
//! number.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ContextRef, EngineHandle, HandlerRegistry, HandlerResult, RunHandle, WorkItemContext,
    WorkItemInfo, WorkerOptions,
};
use crate::error::{EngineError, HeartbeatError, WorkItemError, HANDLER_NOT_FOUND};

// =============================================================================
// Work items
// =============================================================================

/// A unit of work submitted to the in-memory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique item ID
    pub id: String,
    /// Handler kind
    pub kind: String,
    /// Handler input
    pub input: serde_json::Value,
    /// Declared heartbeat timeout
    pub heartbeat_timeout: Option<Duration>,
}

impl WorkItem {
    /// Create a new work item with a generated ID
    pub fn new(kind: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: format!("item-{}", Uuid::now_v7()),
            kind: kind.into(),
            input,
            heartbeat_timeout: None,
        }
    }

    /// Set the item ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Require heartbeats at least every `timeout`
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

/// Lifecycle status of a submitted item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    /// Waiting in its queue
    Pending,
    /// Claimed by a worker
    Running,
    /// Handler returned a value
    Completed,
    /// Handler returned an error or panicked
    Failed,
}

/// Engine-side record of a work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRecord {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub status: WorkItemStatus,
    /// Number of deliveries so far
    pub attempts: u32,
    /// Heartbeats accepted for the current attempt
    pub heartbeats: u64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    pub error: Option<WorkItemError>,
    pub finished_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Engine state
// =============================================================================

#[derive(Default)]
struct MemoryQueue {
    pending: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
}

impl MemoryQueue {
    fn push(&self, item: WorkItem) {
        self.pending.lock().push_back(item);
        self.notify.notify_one();
    }

    /// Wait for the next pending item
    async fn pop(&self) -> WorkItem {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.pending.lock().pop_front() {
                return item;
            }
            notified.await;
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

struct EngineState {
    address: String,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    records: RwLock<HashMap<String, WorkItemRecord>>,
}

impl EngineState {
    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        Arc::clone(self.queues.lock().entry(name.to_string()).or_default())
    }

    /// Mark an item as claimed and return its attempt number
    fn claim(&self, item: &WorkItem) -> u32 {
        let mut records = self.records.write();
        match records.get_mut(&item.id) {
            Some(record) => {
                record.status = WorkItemStatus::Running;
                record.attempts += 1;
                record.heartbeats = 0;
                record.last_heartbeat_at = None;
                record.attempts
            }
            None => 1,
        }
    }

    fn finish(&self, id: &str, attempt: u32, result: HandlerResult) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(id) else {
            return;
        };
        if record.attempts != attempt || record.status != WorkItemStatus::Running {
            return;
        }
        match result {
            Ok(output) => {
                record.status = WorkItemStatus::Completed;
                record.output = Some(output);
                record.error = None;
            }
            Err(error) => {
                record.status = WorkItemStatus::Failed;
                record.error = Some(error);
            }
        }
        record.finished_at = Some(Utc::now());
    }

    /// Put an item whose execution was torn down back on its queue
    fn redeliver(&self, queue: &str, item: WorkItem, attempt: u32) {
        {
            let mut records = self.records.write();
            if let Some(record) = records.get_mut(&item.id) {
                if record.attempts != attempt || record.status != WorkItemStatus::Running {
                    return;
                }
                record.status = WorkItemStatus::Pending;
            }
        }
        debug!(work_item_id = %item.id, attempt, "Redelivering interrupted work item");
        self.queue(queue).push(item);
    }

    fn heartbeat(&self, id: &str, attempt: u32) -> Result<(), HeartbeatError> {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record)
                if record.status == WorkItemStatus::Running && record.attempts == attempt =>
            {
                record.heartbeats += 1;
                record.last_heartbeat_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(HeartbeatError::ChannelClosed),
        }
    }
}

// =============================================================================
// MemoryEngine
// =============================================================================

/// In-process orchestration engine
///
/// Cloning yields another handle to the same queues and records.
///
/// # Example
///
/// ```
/// use turnover_lifecycle::engine::{MemoryEngine, WorkItem};
///
/// let engine = MemoryEngine::new("local");
/// let id = engine.submit("activities", WorkItem::new("simple_activity", serde_json::json!({})));
/// assert_eq!(engine.pending_count("activities"), 1);
/// assert!(engine.record(&id).is_some());
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    /// Create a new, empty engine
    pub fn new(name: &str) -> Self {
        Self {
            state: Arc::new(EngineState {
                address: format!("memory://{name}"),
                queues: Mutex::new(HashMap::new()),
                records: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Submit a work item to a queue and return its ID
    pub fn submit(&self, queue: &str, item: WorkItem) -> String {
        let id = item.id.clone();
        self.state.records.write().insert(
            id.clone(),
            WorkItemRecord {
                id: id.clone(),
                kind: item.kind.clone(),
                queue: queue.to_string(),
                status: WorkItemStatus::Pending,
                attempts: 0,
                heartbeats: 0,
                last_heartbeat_at: None,
                output: None,
                error: None,
                finished_at: None,
            },
        );
        self.state.queue(queue).push(item);
        id
    }

    /// Snapshot of an item's record
    pub fn record(&self, id: &str) -> Option<WorkItemRecord> {
        self.state.records.read().get(id).cloned()
    }

    /// Number of items waiting in a queue
    pub fn pending_count(&self, queue: &str) -> usize {
        self.state.queue(queue).len()
    }

    /// Number of items with the given status
    pub fn count_with_status(&self, status: WorkItemStatus) -> usize {
        self.state
            .records
            .read()
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl EngineHandle for MemoryEngine {
    fn address(&self) -> &str {
        &self.state.address
    }

    async fn start_worker(
        &self,
        options: WorkerOptions,
        handlers: HandlerRegistry,
    ) -> Result<Arc<dyn RunHandle>, EngineError> {
        if options.queue_name.is_empty() {
            return Err(EngineError::EmptyQueueName);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Arc::new(MemoryWorker {
            state: Arc::clone(&self.state),
            options,
            handlers,
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }))
    }
}

// =============================================================================
// MemoryWorker
// =============================================================================

struct MemoryWorker {
    state: Arc<EngineState>,
    options: WorkerOptions,
    handlers: HandlerRegistry,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[async_trait]
impl RunHandle for MemoryWorker {
    async fn run(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        let queue_name = self.options.queue_name.clone();
        let queue = self.state.queue(&queue_name);
        let slots = Arc::new(Semaphore::new(self.options.concurrency_limit));
        let mut in_flight = JoinSet::new();

        info!(
            queue = %queue_name,
            concurrency_limit = self.options.concurrency_limit,
            kinds = ?self.handlers.kinds(),
            "Worker run loop started"
        );

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }

            let mut shutdown_rx = self.shutdown_rx.clone();
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                item = queue.pop() => item,
            };

            let attempt = self.state.claim(&item);
            let ctx = Arc::new(MemoryWorkItemContext {
                info: WorkItemInfo {
                    id: item.id.clone(),
                    kind: item.kind.clone(),
                    heartbeat_timeout: item.heartbeat_timeout,
                    attempt,
                },
                state: Arc::clone(&self.state),
            });
            let handler = self.handlers.get(&item.kind);
            let guard = DeliveryGuard {
                state: Arc::clone(&self.state),
                queue: queue_name.clone(),
                item: Some(item),
                attempt,
            };

            debug!(work_item_id = %ctx.info.id, attempt, "Executing work item");

            in_flight.spawn(async move {
                let mut guard = guard;
                let input = guard
                    .item
                    .as_ref()
                    .map(|item| item.input.clone())
                    .unwrap_or_default();
                let result = match handler {
                    Some(handler) => {
                        let item_ctx: ContextRef = ctx.clone();
                        handler(item_ctx, input).await
                    }
                    None => Err(WorkItemError::non_retryable(format!(
                        "no handler registered for kind: {}",
                        ctx.info.kind
                    ))
                    .with_type(HANDLER_NOT_FOUND)),
                };
                if let Err(e) = &result {
                    warn!(work_item_id = %ctx.info.id, error = %e, "Work item failed");
                }
                guard.finish(result);
                drop(permit);
            });
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!(queue = %queue_name, in_flight = draining, "Draining in-flight work items");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        info!(queue = %queue_name, "Worker run loop stopped");
        Ok(())
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Work item task panicked");
        }
    }
}

/// Tracks one delivery; redelivers the item if execution is torn down
struct DeliveryGuard {
    state: Arc<EngineState>,
    queue: String,
    item: Option<WorkItem>,
    attempt: u32,
}

impl DeliveryGuard {
    fn finish(&mut self, result: HandlerResult) {
        if let Some(item) = self.item.take() {
            self.state.finish(&item.id, self.attempt, result);
        }
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        let Some(item) = self.item.take() else {
            return;
        };
        if std::thread::panicking() {
            self.state.finish(
                &item.id,
                self.attempt,
                Err(WorkItemError::non_retryable("work item handler panicked")),
            );
        } else {
            self.state.redeliver(&self.queue, item, self.attempt);
        }
    }
}

struct MemoryWorkItemContext {
    info: WorkItemInfo,
    state: Arc<EngineState>,
}

impl WorkItemContext for MemoryWorkItemContext {
    fn info(&self) -> &WorkItemInfo {
        &self.info
    }

    fn heartbeat(&self) -> Result<(), HeartbeatError> {
        self.state.heartbeat(&self.info.id, self.info.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handlers() -> HandlerRegistry {
        HandlerRegistry::new().with("echo", |ctx, input| async move {
            ctx.heartbeat()?;
            Ok(input)
        })
    }

    #[tokio::test]
    async fn test_submit_records_pending_item() {
        let engine = MemoryEngine::new("test");
        let id = engine.submit("q", WorkItem::new("echo", json!({"n": 1})).with_id("item-1"));

        assert_eq!(id, "item-1");
        assert_eq!(engine.pending_count("q"), 1);
        let record = engine.record("item-1").unwrap();
        assert_eq!(record.status, WorkItemStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn test_worker_executes_and_drains() {
        let engine = MemoryEngine::new("test");
        engine.submit("q", WorkItem::new("echo", json!({"n": 1})).with_id("a"));
        engine.submit("q", WorkItem::new("echo", json!({"n": 2})).with_id("b"));

        let run = engine
            .start_worker(WorkerOptions::new("q", 1), echo_handlers())
            .await
            .unwrap();
        let task = tokio::spawn({
            let run = Arc::clone(&run);
            async move { run.run().await }
        });

        while engine.count_with_status(WorkItemStatus::Completed) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        run.shutdown();
        task.await.unwrap().unwrap();

        let record = engine.record("b").unwrap();
        assert_eq!(record.output, Some(json!({"n": 2})));
        assert_eq!(record.heartbeats, 1);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_item() {
        let engine = MemoryEngine::new("test");
        engine.submit("q", WorkItem::new("unknown", json!({})).with_id("x"));

        let run = engine
            .start_worker(WorkerOptions::new("q", 1), echo_handlers())
            .await
            .unwrap();
        let task = tokio::spawn({
            let run = Arc::clone(&run);
            async move { run.run().await }
        });

        while engine.count_with_status(WorkItemStatus::Failed) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        run.shutdown();
        task.await.unwrap().unwrap();

        let error = engine.record("x").unwrap().error.unwrap();
        assert_eq!(error.error_type.as_deref(), Some(HANDLER_NOT_FOUND));
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let engine = MemoryEngine::new("test");
        let run = engine
            .start_worker(WorkerOptions::new("q", 1), echo_handlers())
            .await
            .unwrap();

        run.shutdown();
        run.run().await.unwrap();
        assert!(matches!(run.run().await, Err(EngineError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_empty_queue_name_rejected() {
        let engine = MemoryEngine::new("test");
        let result = engine
            .start_worker(WorkerOptions::new("", 1), echo_handlers())
            .await;
        assert!(matches!(result, Err(EngineError::EmptyQueueName)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_torn_down_item_is_redelivered() {
        let engine = MemoryEngine::new("test");
        engine.submit("q", WorkItem::new("slow", json!({})).with_id("slow-1"));

        let handlers = HandlerRegistry::new().with("slow", |_ctx, _input| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("done"))
        });
        let run = engine
            .start_worker(WorkerOptions::new("q", 1), handlers)
            .await
            .unwrap();
        let task = tokio::spawn({
            let run = Arc::clone(&run);
            async move { run.run().await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.record("slow-1").unwrap().status, WorkItemStatus::Running);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        // Aborted item tasks are dropped on the next runtime turn
        tokio::time::sleep(Duration::from_millis(10)).await;

        let record = engine.record("slow-1").unwrap();
        assert_eq!(record.status, WorkItemStatus::Pending);
        assert_eq!(record.attempts, 1);
        assert_eq!(engine.pending_count("q"), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_after_finish_is_rejected() {
        let engine = MemoryEngine::new("test");
        let item = WorkItem::new("echo", json!({})).with_id("hb");
        engine.submit("q", item.clone());

        let attempt = engine.state.claim(&item);
        assert!(engine.state.heartbeat("hb", attempt).is_ok());

        engine.state.finish("hb", attempt, Ok(json!(null)));
        assert_eq!(
            engine.state.heartbeat("hb", attempt),
            Err(HeartbeatError::ChannelClosed)
        );
    }
}
