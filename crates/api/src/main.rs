//! Visual Proctoring Service - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::load().context("loading configuration")?;
    init_logging(&config.logging).context("initializing logging")?;

    info!("=== Visual Proctoring Service v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        max_warnings = config.exam.max_warnings,
        auto_submit = config.exam.auto_submit_threshold,
        "Exam defaults loaded"
    );

    run_server(config).await.context("running proctoring server")?;

    Ok(())
}
