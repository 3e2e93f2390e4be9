//! # Turnover Lifecycle
//!
//! Client-side lifecycle for long-running task workers: periodic graceful
//! restarts and heartbeat supervision of slow work items.
//!
//! ## Features
//!
//! - **Restart loop**: sessions are recycled on a jittered interval, draining in-flight work first
//! - **Bounded drain**: a graceful shutdown timeout force-stops sessions that will not drain
//! - **Heartbeats**: liveness signals at half the declared timeout, joined before the outcome is reported
//! - **In-memory engine**: a queue-backed engine for local runs and tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RestartController                         │
//! │  (start session, jittered sleep, graceful shutdown, repeat)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkerSession                            │
//! │  (Starting → Running → ShuttingDown → Stopped)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              EngineHandle / RunHandle                        │
//! │  (work item handlers, each wrapped by a LivenessSupervisor)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use turnover_lifecycle::prelude::*;
//!
//! let config = WorkerConfig::from_env()?;
//! let connection = connect(&config.engine_address).await?;
//!
//! let handlers = HandlerRegistry::new().with("simple_activity", |_ctx, _input| async {
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     Ok(json!({"status": "completed"}))
//! });
//!
//! let controller = RestartController::new(connection.handle(), handlers, &config);
//! controller.run_forever(CancellationToken::new()).await;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod observer;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::WorkerConfig;
    pub use crate::engine::{
        connect, Connection, ContextRef, EngineHandle, HandlerRegistry, HandlerResult,
        MemoryEngine, RunHandle, WorkItem, WorkItemContext, WorkItemInfo, WorkerOptions,
    };
    pub use crate::error::{
        ConnectionError, ControllerError, EngineError, HeartbeatError, ShutdownError,
        WorkItemError,
    };
    pub use crate::heartbeat::{HeartbeatStrategy, LivenessSupervisor};
    pub use crate::observer::{LifecycleObserver, NoopObserver, ObserverRef, TracingObserver};
    pub use crate::worker::{RestartController, SessionState, ShutdownOutcome, WorkerSession};
    pub use tokio_util::sync::CancellationToken;
}
