//! MCP stdio server for the Kibbutz browser-tab tools.
//!
//! Speaks newline-delimited JSON-RPC 2.0, lists the tool catalog and hands
//! validated tool calls to a [`ToolRelay`].

pub mod catalog;
pub mod jsonrpc;
pub mod server;

pub use catalog::{ArgumentError, ToolSpec};
pub use server::{McpServer, ToolFuture, ToolRelay};

/// Protocol revision answered when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Server name reported in `initialize`.
pub const SERVER_NAME: &str = "kibbutz-mcp";

/// Errors that end the stdio server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
