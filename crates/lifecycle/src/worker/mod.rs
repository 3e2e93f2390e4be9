//! Worker sessions and the restart loop
//!
//! This module provides:
//! - [`WorkerSession`] - one running worker bound to a queue, start to full stop
//! - [`RestartController`] - recycles sessions forever with jittered intervals
//! - [`RestartJitter`] - ±10% uniform perturbation of the restart interval
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RestartController                         │
//! │   cycle 1          cycle 2          cycle 3                  │
//! │  ┌─────────┐      ┌─────────┐      ┌─────────┐               │
//! │  │ Session │ ───► │ Session │ ───► │ Session │ ───► ...      │
//! │  └────┬────┘      └─────────┘      └─────────┘               │
//! │       │  start ─ sleep(I * U(0.9, 1.1)) ─ shutdown(grace)    │
//! │       ▼                                                      │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │   RunHandle (engine run loop, semaphore-limited)    │    │
//! │  │   [item] ─ LivenessSupervisor ─ heartbeat()         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use turnover_lifecycle::worker::RestartController;
//!
//! let controller = RestartController::new(connection.handle(), handlers, &config);
//!
//! let cancel = CancellationToken::new();
//! controller.run_forever(cancel.child_token()).await;
//! ```

mod controller;
mod jitter;
mod session;

pub use controller::{CycleOutcome, RestartController};
pub use jitter::{RestartJitter, DEFAULT_SPREAD};
pub use session::{SessionState, ShutdownOutcome, WorkerSession};
