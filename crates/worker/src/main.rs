use anyhow::Result;
use clap::Parser;
use turnover_lifecycle::telemetry::{init_telemetry, TelemetryConfig};
use turnover_worker::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // .env values act as defaults for the env-backed flags
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - NO_COLOR: Disable ANSI colors
    let mut telemetry_config = TelemetryConfig::from_env();
    if let Ok(index) = std::env::var(turnover_worker::fanout::WORKER_INDEX_ENV) {
        telemetry_config = telemetry_config.with_service_name(format!("turnover-worker-{index}"));
    }
    if let Err(e) = init_telemetry(&telemetry_config) {
        eprintln!("Failed to initialize telemetry: {e}");
    }

    tracing::info!(
        service = %telemetry_config.service_name,
        pid = std::process::id(),
        "turnover-worker starting..."
    );

    turnover_worker::run(cli).await
}
