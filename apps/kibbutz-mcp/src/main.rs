//! Kibbutz MCP server entry point.

mod app;
mod config;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout carries the MCP protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Kibbutz MCP server");

    let config = config::Config::load()?;
    tracing::info!(
        bind = %config.bind_address,
        port = config.port,
        extension = %config.extension_id,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config));
    // The stdin reader sits on a blocking thread that never finishes on its own.
    rt.shutdown_timeout(Duration::from_millis(500));
    result?;

    tracing::info!("shut down cleanly");
    Ok(())
}
