//! Orchestration engine boundary
//!
//! The worker lifecycle consumes only a handful of engine operations:
//! - [`connect`] - reach an engine by address
//! - [`EngineHandle::start_worker`] - bind a worker to a queue
//! - [`RunHandle::run`] / [`RunHandle::shutdown`] - drive and stop that worker
//! - [`WorkItemContext`] - per-item metadata and the liveness primitive
//!
//! It hands the engine a [`HandlerRegistry`] of work-item functions in return.
//!
//! # Example
//!
//! ```ignore
//! use turnover_lifecycle::engine::{connect, HandlerRegistry, WorkerOptions};
//!
//! let connection = connect("memory://local").await?;
//!
//! let handlers = HandlerRegistry::new().with("simple_activity", |ctx, input| async move {
//!     Ok(json!({"status": "completed"}))
//! });
//!
//! let run = connection
//!     .handle()
//!     .start_worker(WorkerOptions::new("activities", 1), handlers)
//!     .await?;
//! ```

mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, EngineError, HeartbeatError, WorkItemError};

pub use memory::{MemoryEngine, WorkItem, WorkItemRecord, WorkItemStatus};

// =============================================================================
// Work item context
// =============================================================================

/// Read-only metadata about one dispatched work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemInfo {
    /// Engine-assigned identifier
    pub id: String,

    /// Kind used to pick the handler
    pub kind: String,

    /// Maximum silence the engine tolerates before declaring the item dead
    ///
    /// `None` disables heartbeating for this item.
    pub heartbeat_timeout: Option<Duration>,

    /// Delivery attempt (1-based)
    pub attempt: u32,
}

/// Per-item view of the engine handed to the unit of work
///
/// Each context backs exactly one work item; liveness signals emitted through
/// it never apply to another item.
pub trait WorkItemContext: Send + Sync {
    /// Metadata of the item being executed
    fn info(&self) -> &WorkItemInfo;

    /// Emit one liveness signal for this item
    ///
    /// # Errors
    ///
    /// Fails when the engine no longer accepts signals for the item.
    fn heartbeat(&self) -> Result<(), HeartbeatError>;
}

/// Shared handle to a work item context
pub type ContextRef = Arc<dyn WorkItemContext>;

// =============================================================================
// Handlers
// =============================================================================

/// Work item execution result
pub type HandlerResult = Result<serde_json::Value, WorkItemError>;

/// Work item handler function type
pub type WorkItemHandler =
    Arc<dyn Fn(ContextRef, serde_json::Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Work item functions a worker exposes, keyed by kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, WorkItemHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a work item kind
    pub fn register<F, Fut>(&mut self, kind: &str, handler: F)
    where
        F: Fn(ContextRef, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: WorkItemHandler = Arc::new(move |ctx, input| Box::pin(handler(ctx, input)));
        self.handlers.insert(kind.to_string(), handler);
    }

    /// Register a handler, builder style
    pub fn with<F, Fut>(mut self, kind: &str, handler: F) -> Self
    where
        F: Fn(ContextRef, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(kind, handler);
        self
    }

    /// Look up the handler for a kind
    pub fn get(&self, kind: &str) -> Option<WorkItemHandler> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// =============================================================================
// Worker binding
// =============================================================================

/// Queue binding of a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Queue to consume from
    pub queue_name: String,

    /// Hard ceiling on simultaneously executing work items
    pub concurrency_limit: usize,
}

impl WorkerOptions {
    /// Create worker options; the concurrency limit is clamped to at least 1
    pub fn new(queue_name: impl Into<String>, concurrency_limit: usize) -> Self {
        Self {
            queue_name: queue_name.into(),
            concurrency_limit: concurrency_limit.max(1),
        }
    }
}

/// A started worker
#[async_trait]
pub trait RunHandle: Send + Sync {
    /// Run the worker
    ///
    /// Suspends until shutdown is requested and every in-flight item has
    /// drained. Dropping the returned future tears down in-flight work.
    async fn run(&self) -> Result<(), EngineError>;

    /// Request a graceful stop: no new work is admitted
    ///
    /// Idempotent and non-blocking.
    fn shutdown(&self);
}

/// Connection to an orchestration engine
///
/// Shared read-only by every session and work item of a worker process.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Address this handle was connected to
    fn address(&self) -> &str;

    /// Bind a new worker to a queue
    async fn start_worker(
        &self,
        options: WorkerOptions,
        handlers: HandlerRegistry,
    ) -> Result<Arc<dyn RunHandle>, EngineError>;
}

// =============================================================================
// Connection
// =============================================================================

/// An established engine connection
#[derive(Clone)]
pub enum Connection {
    /// In-process engine (`memory://<name>`)
    Memory(MemoryEngine),
}

impl Connection {
    /// Engine handle shared by sessions
    pub fn handle(&self) -> Arc<dyn EngineHandle> {
        match self {
            Connection::Memory(engine) => Arc::new(engine.clone()),
        }
    }

    /// In-process engine behind this connection, if any
    pub fn memory(&self) -> Option<&MemoryEngine> {
        match self {
            Connection::Memory(engine) => Some(engine),
        }
    }
}

/// Connect to the engine at `address`
///
/// Supported addresses: `memory://<name>`. There is no retry here; the
/// caller decides whether a failed connection is worth another attempt.
pub async fn connect(address: &str) -> Result<Connection, ConnectionError> {
    let (scheme, rest) = address
        .split_once("://")
        .ok_or_else(|| ConnectionError::InvalidAddress(address.to_string()))?;

    if scheme.is_empty() {
        return Err(ConnectionError::InvalidAddress(address.to_string()));
    }

    match scheme {
        "memory" => {
            let name = if rest.is_empty() { "default" } else { rest };
            Ok(Connection::Memory(MemoryEngine::new(name)))
        }
        other => Err(ConnectionError::UnsupportedScheme {
            scheme: other.to_string(),
            address: address.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_memory() {
        let connection = connect("memory://local").await.unwrap();
        let handle = connection.handle();

        assert_eq!(handle.address(), "memory://local");
        assert!(connection.memory().is_some());
    }

    #[tokio::test]
    async fn test_connect_memory_default_name() {
        let connection = connect("memory://").await.unwrap();
        assert_eq!(connection.handle().address(), "memory://default");
    }

    #[tokio::test]
    async fn test_connect_unsupported_scheme() {
        let result = connect("grpc://localhost:7233").await;
        assert!(matches!(
            result,
            Err(ConnectionError::UnsupportedScheme { ref scheme, .. }) if scheme == "grpc"
        ));
    }

    #[tokio::test]
    async fn test_connect_invalid_address() {
        assert!(matches!(
            connect("localhost:7233").await,
            Err(ConnectionError::InvalidAddress(_))
        ));
        assert!(matches!(
            connect("://nothing").await,
            Err(ConnectionError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_worker_options_clamp_concurrency() {
        let options = WorkerOptions::new("activities", 0);
        assert_eq!(options.concurrency_limit, 1);
    }

    #[test]
    fn test_handler_registry() {
        let registry = HandlerRegistry::new()
            .with("b_activity", |_ctx, _input| async { Ok(json!(null)) })
            .with("a_activity", |_ctx, input| async move { Ok(input) });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kinds(), vec!["a_activity", "b_activity"]);
        assert!(registry.get("a_activity").is_some());
        assert!(registry.get("missing").is_none());
    }
}
