// Turnover Worker
//
// Standalone worker process: parses the command line, connects to the engine
// and runs the restart loop, either in-process or fanned out over sibling
// processes.

pub mod activities;
pub mod cli;
pub mod fanout;
pub mod feeder;
pub mod signals;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turnover_lifecycle::config::WorkerConfig;
use turnover_lifecycle::engine::{connect, Connection};
use turnover_lifecycle::error::ControllerError;
use turnover_lifecycle::worker::RestartController;

pub use cli::Cli;
pub use fanout::FanOut;

/// Run the worker until an OS termination signal arrives
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.worker_config().context("Invalid worker configuration")?;
    let feed_period = cli.feed_period().context("Invalid worker configuration")?;

    // Connection failures are fatal before anything is started.
    let connection = connect(&config.engine_address)
        .await
        .with_context(|| format!("Failed to connect to engine at {}", config.engine_address))?;

    let cancel = CancellationToken::new();
    let work = serve(&cli, &config, connection, feed_period, cancel.clone());
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => return result,
        signal = signals::wait_for_shutdown_signal() => {
            signal.map_err(ControllerError::Signal)?;
            info!("Received shutdown signal");
        }
    }

    cancel.cancel();
    work.await?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Run the restart loop in-process, or supervise sibling processes running it
async fn serve(
    cli: &Cli,
    config: &WorkerConfig,
    connection: Connection,
    feed_period: Option<Duration>,
    cancel: CancellationToken,
) -> Result<()> {
    if config.workers > 1 {
        info!(workers = config.workers, "Starting worker processes");
        return FanOut::current_exe(cli.sibling_args(), config.workers)?
            .with_exit_timeout(config.graceful_shutdown_timeout + fanout::EXIT_SLACK)
            .run(cancel)
            .await;
    }

    if let Some(period) = feed_period {
        start_feeder(&connection, config, period, &cancel);
    }

    let controller = RestartController::new(connection.handle(), activities::registry(), config);
    let cycles = controller.run_forever(cancel).await;
    info!(cycles, "Restart loop finished");
    Ok(())
}

fn start_feeder(
    connection: &Connection,
    config: &WorkerConfig,
    period: Duration,
    cancel: &CancellationToken,
) {
    match connection.memory() {
        Some(engine) => {
            tokio::spawn(feeder::feed(
                engine.clone(),
                config.queue_name.clone(),
                period,
                cancel.child_token(),
            ));
        }
        None => warn!("--feed-interval only applies to the in-memory engine, ignoring"),
    }
}
