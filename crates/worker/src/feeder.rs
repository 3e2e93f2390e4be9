// Demo load feeder
//
// Keeps an in-memory queue supplied so a standalone worker always has
// in-flight work to drain at each restart.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use turnover_lifecycle::engine::{MemoryEngine, WorkItem};

use crate::activities::{KINDS, SIMPLE_ACTIVITY};

/// Heartbeat timeout declared on supervised demo items
pub const DEMO_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the `n`-th demo item: kinds rotate, durations are randomized
pub fn demo_item<R: Rng + ?Sized>(rng: &mut R, n: u64) -> WorkItem {
    let kind = KINDS[(n % KINDS.len() as u64) as usize];
    if kind == SIMPLE_ACTIVITY {
        return WorkItem::new(kind, json!({"duration_ms": 100}));
    }

    let duration_ms: u64 = rng.gen_range(500..=6_000);
    WorkItem::new(kind, json!({"duration_ms": duration_ms}))
        .with_heartbeat_timeout(DEMO_HEARTBEAT_TIMEOUT)
}

/// Submit one demo item every `period` until cancelled
///
/// Returns the number of items submitted.
pub async fn feed(
    engine: MemoryEngine,
    queue: String,
    period: Duration,
    cancel: CancellationToken,
) -> u64 {
    info!(queue = %queue, period_ms = period.as_millis() as u64, "Demo feeder started");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut submitted = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let item = demo_item(&mut rand::thread_rng(), submitted);
                let kind = item.kind.clone();
                let id = engine.submit(&queue, item);
                submitted += 1;
                debug!(work_item_id = %id, kind = %kind, "Submitted demo item");
            }
        }
    }

    info!(queue = %queue, submitted, "Demo feeder stopped");
    submitted
}
