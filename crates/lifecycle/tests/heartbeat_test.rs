//! Integration tests for heartbeat supervision
//!
//! Run with: cargo test -p turnover-lifecycle --test heartbeat_test

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use turnover_lifecycle::engine::{
    EngineHandle, HandlerRegistry, MemoryEngine, WorkItem, WorkItemContext, WorkItemInfo,
    WorkItemStatus, WorkerOptions,
};
use turnover_lifecycle::error::{HeartbeatError, WorkItemError};
use turnover_lifecycle::heartbeat::{HeartbeatStrategy, LivenessSupervisor};
use turnover_lifecycle::observer::{LifecycleObserver, NoopObserver};

/// Work item context recording every emission
struct CountingContext {
    info: WorkItemInfo,
    calls: AtomicU64,
    fail_on: Option<u64>,
    emitted_at: Mutex<Vec<Instant>>,
}

impl CountingContext {
    fn new(timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self::build(timeout, None))
    }

    fn failing_on(timeout: Duration, call: u64) -> Arc<Self> {
        Arc::new(Self::build(Some(timeout), Some(call)))
    }

    fn build(timeout: Option<Duration>, fail_on: Option<u64>) -> Self {
        Self {
            info: WorkItemInfo {
                id: "item-heartbeat".to_string(),
                kind: "long_activity".to_string(),
                heartbeat_timeout: timeout,
                attempt: 1,
            },
            calls: AtomicU64::new(0),
            fail_on,
            emitted_at: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn emitted(&self) -> Vec<Instant> {
        self.emitted_at.lock().clone()
    }
}

impl WorkItemContext for CountingContext {
    fn info(&self) -> &WorkItemInfo {
        &self.info
    }

    fn heartbeat(&self) -> Result<(), HeartbeatError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(HeartbeatError::Rejected("engine unreachable".to_string()));
        }
        self.emitted_at.lock().push(Instant::now());
        Ok(())
    }
}

#[derive(Default)]
struct HeartbeatLog {
    sent: Mutex<Vec<u64>>,
    failed: Mutex<u32>,
    stopped: Mutex<Option<u64>>,
}

impl LifecycleObserver for HeartbeatLog {
    fn on_heartbeat_sent(&self, _work_item_id: &str, sequence: u64) {
        self.sent.lock().push(sequence);
    }

    fn on_heartbeat_failed(&self, _work_item_id: &str, _error: &HeartbeatError) {
        *self.failed.lock() += 1;
    }

    fn on_heartbeat_stopped(&self, _work_item_id: &str, sent: u64) {
        *self.stopped.lock() = Some(sent);
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cooperative_cadence_over_long_work() {
    let ctx = CountingContext::new(Some(Duration::from_secs(4)));
    let log = Arc::new(HeartbeatLog::default());
    let supervisor =
        LivenessSupervisor::new(ctx.clone(), HeartbeatStrategy::Cooperative).with_observer(log.clone());
    let started = Instant::now();

    let result = supervisor
        .supervise_future(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("report ready")
        })
        .await;

    assert_eq!(result.unwrap(), "report ready");
    let offsets: Vec<Duration> = ctx.emitted().iter().map(|at| *at - started).collect();
    assert_eq!(offsets, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    assert_eq!(*log.sent.lock(), vec![1, 2]);
    assert_eq!(*log.stopped.lock(), Some(2));

    // temporal fencing: nothing after return
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ctx.calls(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_signal_count_bounds_for_various_timeouts() {
    let work = Duration::from_secs(7);

    for timeout_secs in [1u64, 2, 3, 5, 8] {
        let timeout = Duration::from_secs(timeout_secs);
        let ctx = CountingContext::new(Some(timeout));
        let supervisor = LivenessSupervisor::new(ctx.clone(), HeartbeatStrategy::Cooperative)
            .with_observer(Arc::new(NoopObserver));

        supervisor
            .supervise_future(async {
                tokio::time::sleep(work).await;
                Ok(())
            })
            .await
            .unwrap();

        let ratio = work.as_secs_f64() / (timeout.as_secs_f64() / 2.0);
        let low = (ratio.floor() as u64).saturating_sub(1);
        let high = ratio.ceil() as u64 + 1;
        let emitted = ctx.calls();
        assert!(
            emitted >= low && emitted <= high,
            "timeout {timeout_secs}s: emitted {emitted}, expected {low}..={high}"
        );
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_second_emission_failure_overrides_success() {
    let ctx = CountingContext::failing_on(Duration::from_secs(2), 2);
    let log = Arc::new(HeartbeatLog::default());
    let supervisor =
        LivenessSupervisor::new(ctx.clone(), HeartbeatStrategy::Cooperative).with_observer(log.clone());

    let result = supervisor
        .supervise_future(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"status": "completed"}))
        })
        .await;

    let error = result.unwrap_err();
    assert!(error.is_heartbeat_failure());
    assert!(error.message.contains("engine unreachable"));
    assert_eq!(ctx.calls(), 2);
    assert_eq!(*log.failed.lock(), 1);
}

#[test_log::test(tokio::test)]
async fn test_thread_strategy_failure_overrides_success() {
    let ctx = CountingContext::failing_on(Duration::from_millis(100), 2);
    let supervisor = LivenessSupervisor::new(ctx.clone(), HeartbeatStrategy::Thread)
        .with_observer(Arc::new(NoopObserver));

    let result = supervisor
        .supervise(|| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(json!({"status": "completed"}))
        })
        .await;

    assert!(result.unwrap_err().is_heartbeat_failure());
    assert_eq!(ctx.calls(), 2);
}

#[test_log::test(tokio::test)]
async fn test_strategies_agree_on_blocking_work() {
    for strategy in [HeartbeatStrategy::Thread, HeartbeatStrategy::Cooperative] {
        let ctx = CountingContext::new(Some(Duration::from_millis(200)));
        let supervisor =
            LivenessSupervisor::new(ctx.clone(), strategy).with_observer(Arc::new(NoopObserver));

        let result = supervisor
            .supervise(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(5)
            })
            .await;
        assert_eq!(result.unwrap(), 5);

        // interval 100ms over 500ms of work, allowing for scheduler delay
        let emitted = ctx.calls();
        assert!((3..=6).contains(&emitted), "{strategy:?}: emitted {emitted}");

        let after_return = ctx.calls();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ctx.calls(), after_return, "{strategy:?}: signal after return");
    }
}

#[test_log::test(tokio::test)]
async fn test_dropping_supervised_work_stops_signals() {
    for strategy in [HeartbeatStrategy::Thread, HeartbeatStrategy::Cooperative] {
        let ctx = CountingContext::new(Some(Duration::from_millis(100)));
        let log = Arc::new(HeartbeatLog::default());
        let supervisor = LivenessSupervisor::new(ctx.clone(), strategy).with_observer(log.clone());

        // the blocking work outlives the caller, as it does when a session aborts its items
        let cancelled = tokio::time::timeout(
            Duration::from_millis(130),
            supervisor.supervise(|| {
                std::thread::sleep(Duration::from_millis(800));
                Ok(())
            }),
        )
        .await;
        assert!(cancelled.is_err(), "{strategy:?}: work finished early");

        let at_cancel = ctx.calls();
        assert!(at_cancel >= 1, "{strategy:?}: no signal before cancel");
        assert_eq!(*log.stopped.lock(), Some(at_cancel), "{strategy:?}");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ctx.calls(), at_cancel, "{strategy:?}: signal after cancel");
    }
}

#[test_log::test(tokio::test)]
async fn test_no_timeout_means_no_signals_for_either_strategy() {
    for strategy in [HeartbeatStrategy::Thread, HeartbeatStrategy::Cooperative] {
        let ctx = CountingContext::new(None);
        let supervisor =
            LivenessSupervisor::new(ctx.clone(), strategy).with_observer(Arc::new(NoopObserver));

        let result: Result<(), WorkItemError> = supervisor
            .supervise(|| {
                std::thread::sleep(Duration::from_millis(100));
                Err(WorkItemError::non_retryable("bad row"))
            })
            .await;

        assert_eq!(result.unwrap_err().message, "bad row");
        assert_eq!(ctx.calls(), 0);
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_engine_counts_heartbeats_of_supervised_item() {
    let engine = MemoryEngine::new("heartbeats");
    let id = engine.submit(
        "activities",
        WorkItem::new("long_activity", json!({"secs": 5}))
            .with_heartbeat_timeout(Duration::from_secs(4)),
    );

    let handlers = HandlerRegistry::new().with("long_activity", |ctx, input| async move {
        let secs = input["secs"].as_u64().unwrap_or(1);
        LivenessSupervisor::new(ctx, HeartbeatStrategy::Cooperative)
            .with_observer(Arc::new(NoopObserver))
            .supervise_future(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(json!({"slept": secs}))
            })
            .await
    });

    let run = engine
        .start_worker(WorkerOptions::new("activities", 1), handlers)
        .await
        .unwrap();
    let task = tokio::spawn({
        let run = run.clone();
        async move { run.run().await }
    });

    while engine.record(&id).unwrap().status != WorkItemStatus::Completed {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    run.shutdown();
    task.await.unwrap().unwrap();

    let record = engine.record(&id).unwrap();
    assert_eq!(record.heartbeats, 2);
    assert_eq!(record.output, Some(json!({"slept": 5})));
}
