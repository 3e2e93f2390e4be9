//! OS termination signals
//!
//! [`wait_for_shutdown_signal`] completes on SIGINT, SIGTERM or SIGQUIT on
//! unix, and on Ctrl-C elsewhere. Fan-out siblings receive SIGTERM from the
//! parent, so all three must end the restart loop the same way.

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => tracing::debug!(signal = "SIGINT", "Signal received"),
        _ = sigterm.recv() => tracing::debug!(signal = "SIGTERM", "Signal received"),
        _ = sigquit.recv() => tracing::debug!(signal = "SIGQUIT", "Signal received"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
