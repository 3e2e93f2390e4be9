// Cooperative heartbeat strategy
//
// The signaling loop is polled in the same task as the work future. When the
// work completes the loop is cancelled and awaited before the outcome is
// reported.

use std::future::Future;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{settle, HeartbeatContext};
use crate::error::{HeartbeatError, WorkItemError};

/// Drive `work` and the signaling loop side by side
pub(super) async fn run_with_signals<F, T>(
    context: &HeartbeatContext,
    work: F,
) -> Result<T, WorkItemError>
where
    F: Future<Output = Result<T, WorkItemError>>,
{
    let stop = CancellationToken::new();
    let beats = signal_loop(context, stop.clone());
    tokio::pin!(beats);
    tokio::pin!(work);

    let mut finished_beats = None;
    let outcome = loop {
        tokio::select! {
            biased;

            outcome = &mut work => break outcome,
            result = &mut beats, if finished_beats.is_none() => {
                finished_beats = Some(result);
            }
        }
    };

    stop.cancel();
    let beats = match finished_beats {
        Some(result) => result,
        None => beats.await,
    };

    settle(beats, outcome)
}

/// Emit one signal per interval until cancelled or an emission fails
async fn signal_loop(
    context: &HeartbeatContext,
    stop: CancellationToken,
) -> Result<(), HeartbeatError> {
    let _signaling = context.signaling();

    let period = context.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => context.beat()?,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::testing::ScriptedContext;
    use super::super::SignalState;
    use super::*;
    use crate::engine::ContextRef;
    use crate::observer::NoopObserver;

    fn context_for(ctx: &Arc<ScriptedContext>) -> Arc<HeartbeatContext> {
        let item: ContextRef = ctx.clone();
        HeartbeatContext::for_item(item, Arc::new(NoopObserver)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_at_each_interval() {
        let ctx = Arc::new(ScriptedContext::new(Some(Duration::from_secs(4))));
        let context = context_for(&ctx);
        let started = Instant::now();

        let result = run_with_signals(&context, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(result.is_ok());
        let offsets: Vec<Duration> = ctx
            .emitted_at
            .lock()
            .iter()
            .map(|at| at.duration_since(started))
            .collect();
        assert_eq!(offsets, vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(context.state(), SignalState::Stopped);
        assert_eq!(context.sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_loop_but_waits_for_work() {
        let ctx = Arc::new(ScriptedContext::new(Some(Duration::from_secs(2))).failing_on(2));
        let context = context_for(&ctx);
        let started = Instant::now();

        let result = run_with_signals(&context, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("finished")
        })
        .await;

        assert!(result.unwrap_err().is_heartbeat_failure());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(ctx.calls(), 2);
        assert_eq!(ctx.emitted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_signal_after_return() {
        let ctx = Arc::new(ScriptedContext::new(Some(Duration::from_secs(2))));
        let context = context_for(&ctx);

        run_with_signals(&context, async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            Ok(())
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctx.calls(), 2);
    }
}
