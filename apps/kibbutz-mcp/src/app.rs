//! Application orchestrator: wires the relay, launcher and MCP server.

use std::net::SocketAddr;
use std::sync::Arc;

use kibbutz_launcher::ChromeLauncher;
use kibbutz_mcp_server::McpServer;
use kibbutz_relay::{ChannelServer, PairingManager, Relay, RelayCore, ServerConfig};
use tokio::io::BufReader;

use crate::config::Config;

/// Runs the server until end of input or a termination signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let core = RelayCore::new();

    // -- Channel server --
    let server_config = ServerConfig {
        addr: SocketAddr::new(config.bind_address, config.port),
    };
    let server = ChannelServer::bind(server_config, Arc::clone(&core)).await?;
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server_run.run().await {
            tracing::error!("channel server error: {e}");
        }
    });

    // -- Relay --
    let launcher = Arc::new(ChromeLauncher::new(
        config.extension_id.clone(),
        config.chrome_path.clone(),
    ));
    let pairing = PairingManager::new(Arc::clone(&core), launcher, config.pairing_timeout());
    let relay = Arc::new(Relay::new(
        Arc::clone(&core),
        pairing,
        config.extension_id.clone(),
    ));

    // -- MCP over stdio --
    let mcp = McpServer::new(relay);
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = mcp.serve(stdin, stdout) => {
            match result {
                Ok(()) => tracing::info!("stdin closed, shutting down"),
                Err(e) => tracing::error!("MCP transport error: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    // -- Shutdown --
    server.shutdown();
    let _ = server_task.await;
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
