// Sibling process fan-out
//
// Decision: Siblings are separate OS processes running this binary with --workers 1,
// so a crash or forced stop in one cannot touch another's sessions.
// Decision: On interrupt each sibling's supervising task sends SIGTERM (via `kill <pid>`
// on unix) while it still owns the un-reaped child, then the parent waits a bounded time
// and kills whatever is left. No sibling is left orphaned.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Environment variable carrying a sibling's index (1-based)
pub const WORKER_INDEX_ENV: &str = "TURNOVER_WORKER_INDEX";

/// Extra time siblings get to exit after the graceful shutdown timeout
pub const EXIT_SLACK: Duration = Duration::from_secs(2);

/// Launch plan for `count` sibling processes
#[derive(Debug, Clone)]
pub struct FanOut {
    program: PathBuf,
    args: Vec<OsString>,
    count: usize,
    exit_timeout: Duration,
}

impl FanOut {
    /// Plan siblings running `program` with `args`
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I, count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            count: count.max(1),
            exit_timeout: EXIT_SLACK,
        }
    }

    /// Plan siblings re-executing the current binary
    pub fn current_exe<I, S>(args: I, count: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let program = std::env::current_exe().context("Failed to locate worker executable")?;
        Ok(Self::new(program, args, count))
    }

    /// How long siblings get to exit after the interrupt is forwarded
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Spawn every sibling and supervise them until `cancel` fires
    ///
    /// A sibling exiting on its own is logged and not restarted; the others
    /// keep running. On cancel every live sibling is terminated and awaited.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut siblings = JoinSet::new();

        for index in 1..=self.count {
            let child = self
                .spawn(index)
                .with_context(|| format!("Failed to spawn worker process {index}"))?;
            info!(index, pid = ?child.id(), "Worker process started");
            siblings.spawn(supervise_sibling(index, child, cancel.clone()));
        }

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                joined = siblings.join_next() => match joined {
                    Some(joined) => report_exit(joined),
                    None => {
                        warn!("All worker processes exited");
                        return Ok(());
                    }
                },
            }
        }

        info!(live = siblings.len(), "Forwarding shutdown to worker processes");

        let drained = tokio::time::timeout(self.exit_timeout, async {
            while let Some(joined) = siblings.join_next().await {
                report_exit(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = siblings.len(),
                "Worker processes did not exit in time, killing"
            );
            // Dropping a task drops its Child, which is spawned with kill_on_drop.
            siblings.shutdown().await;
        }

        info!("All worker processes stopped");
        Ok(())
    }

    fn spawn(&self, index: usize) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

/// How one sibling process ended
#[derive(Debug)]
struct SiblingExit {
    index: usize,
    status: std::io::Result<ExitStatus>,
    /// Whether shutdown was forwarded to the process before it exited
    terminated: bool,
}

/// Wait for a sibling, forwarding shutdown to it once `cancel` fires
///
/// The child is owned here until it is reaped, so the pid being signaled
/// always belongs to this sibling.
async fn supervise_sibling(
    index: usize,
    mut child: Child,
    cancel: CancellationToken,
) -> SiblingExit {
    tokio::select! {
        biased;

        status = child.wait() => {
            return SiblingExit { index, status, terminated: false };
        }
        _ = cancel.cancelled() => {}
    }

    // `id` is None once the child has been reaped.
    let terminated = match child.id() {
        Some(pid) => terminate(pid).await,
        None => false,
    };

    SiblingExit {
        index,
        status: child.wait().await,
        terminated,
    }
}

fn report_exit(joined: Result<SiblingExit, tokio::task::JoinError>) {
    let exit = match joined {
        Ok(exit) => exit,
        Err(e) => {
            error!(error = %e, "Worker process supervisor task failed");
            return;
        }
    };

    let index = exit.index;
    match exit.status {
        Ok(status) if status.success() || exit.terminated => {
            info!(index, status = %status, terminated = exit.terminated, "Worker process exited")
        }
        Ok(status) => warn!(index, status = %status, "Worker process exited abnormally"),
        Err(e) => error!(index, error = %e, "Failed to wait for worker process"),
    }
}

/// Ask a sibling to stop gracefully
///
/// Returns whether the signal was delivered.
#[cfg(unix)]
async fn terminate(pid: u32) -> bool {
    match Command::new("kill").arg(pid.to_string()).status().await {
        Ok(status) if status.success() => {
            debug!(pid, "Sent SIGTERM");
            true
        }
        Ok(status) => {
            debug!(pid, status = %status, "kill returned non-zero");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "Failed to run kill");
            false
        }
    }
}

#[cfg(not(unix))]
async fn terminate(pid: u32) -> bool {
    // No graceful signal here; the exit timeout falls through to a hard kill.
    debug!(pid, "Graceful termination unsupported on this platform");
    false
}
