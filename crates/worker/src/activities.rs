//! Demo activities registered on the worker queue
//!
//! - `simple_activity`: short async sleep, no heartbeating
//! - `blocking_activity`: blocking sleep on a worker thread, heartbeats from a timer thread
//! - `async_activity`: async sleep, heartbeats from the same task
//!
//! Input: `{"duration_ms": <u64>}`; each kind has its own default duration.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;
use turnover_lifecycle::engine::{ContextRef, HandlerRegistry, HandlerResult};
use turnover_lifecycle::heartbeat::{HeartbeatStrategy, LivenessSupervisor};

pub const SIMPLE_ACTIVITY: &str = "simple_activity";
pub const BLOCKING_ACTIVITY: &str = "blocking_activity";
pub const ASYNC_ACTIVITY: &str = "async_activity";

/// Every demo kind, in feed order
pub const KINDS: [&str; 3] = [SIMPLE_ACTIVITY, BLOCKING_ACTIVITY, ASYNC_ACTIVITY];

const SIMPLE_DEFAULT: Duration = Duration::from_millis(100);
const SUPERVISED_DEFAULT: Duration = Duration::from_secs(3);

/// Registry with every demo activity
pub fn registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(SIMPLE_ACTIVITY, simple_activity)
        .with(BLOCKING_ACTIVITY, blocking_activity)
        .with(ASYNC_ACTIVITY, async_activity)
}

fn requested_duration(input: &Value, default: Duration) -> Duration {
    input
        .get("duration_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

async fn simple_activity(ctx: ContextRef, input: Value) -> HandlerResult {
    let duration = requested_duration(&input, SIMPLE_DEFAULT);
    tokio::time::sleep(duration).await;

    info!(work_item_id = %ctx.info().id, "Simple activity completed");
    Ok(json!({
        "status": "completed",
        "activity": SIMPLE_ACTIVITY,
        "duration_ms": duration.as_millis() as u64,
    }))
}

async fn blocking_activity(ctx: ContextRef, input: Value) -> HandlerResult {
    let duration = requested_duration(&input, SUPERVISED_DEFAULT);
    let id = ctx.info().id.clone();

    LivenessSupervisor::new(ctx, HeartbeatStrategy::Thread)
        .supervise(move || {
            std::thread::sleep(duration);
            info!(work_item_id = %id, "Blocking activity completed");
            Ok(json!({
                "status": "completed",
                "activity": BLOCKING_ACTIVITY,
                "duration_ms": duration.as_millis() as u64,
            }))
        })
        .await
}

async fn async_activity(ctx: ContextRef, input: Value) -> HandlerResult {
    let duration = requested_duration(&input, SUPERVISED_DEFAULT);
    let id = ctx.info().id.clone();

    LivenessSupervisor::new(ctx, HeartbeatStrategy::Cooperative)
        .supervise_future(async move {
            tokio::time::sleep(duration).await;
            info!(work_item_id = %id, "Async activity completed");
            Ok(json!({
                "status": "completed",
                "activity": ASYNC_ACTIVITY,
                "duration_ms": duration.as_millis() as u64,
            }))
        })
        .await
}
