//! Newline-delimited JSON-RPC loop over a reader/writer pair.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kibbutz_protocol::CallResult;
use kibbutz_relay::Relay;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::catalog;
use crate::jsonrpc::{
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, Request, Response,
};
use crate::{DEFAULT_PROTOCOL_VERSION, McpError, SERVER_NAME};

/// Queued responses waiting for the writer.
const OUTBOX_SIZE: usize = 64;

/// A boxed future returned by [`ToolRelay::call`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = CallResult> + Send + 'a>>;

/// Executes validated tool calls.
///
/// Failures the user can act on come back as a [`CallResult`] with
/// `is_error` set, never as a JSON-RPC error.
pub trait ToolRelay: Send + Sync + 'static {
    fn call<'a>(&'a self, message: &'a str, args: Value) -> ToolFuture<'a>;
}

impl ToolRelay for Relay {
    fn call<'a>(&'a self, message: &'a str, args: Value) -> ToolFuture<'a> {
        Box::pin(Relay::call(self, message, args))
    }
}

/// What to do with one input line.
#[derive(Debug)]
enum Dispatch {
    Ignore,
    Reply(Response),
    Call {
        id: Value,
        tool: &'static str,
        args: Value,
    },
}

/// MCP server over any line-oriented byte stream (stdin/stdout in practice).
pub struct McpServer<R: ToolRelay> {
    relay: Arc<R>,
    version: String,
}

impl<R: ToolRelay> McpServer<R> {
    pub fn new(relay: Arc<R>) -> Self {
        Self {
            relay,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Serves requests until `reader` reaches end of input.
    ///
    /// Tool calls run concurrently; every response goes through a single
    /// writer task so lines never interleave. Calls still in flight at end
    /// of input are abandoned.
    pub async fn serve<I, O>(&self, reader: I, writer: O) -> Result<(), McpError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(OUTBOX_SIZE);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut calls = JoinSet::new();
        let mut lines = reader.lines();

        tracing::info!("MCP server reading from stdio");
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match self.dispatch(&line) {
                Dispatch::Ignore => {}
                Dispatch::Reply(resp) => {
                    if tx.send(serde_json::to_string(&resp)?).await.is_err() {
                        break;
                    }
                }
                Dispatch::Call { id, tool, args } => {
                    let relay = Arc::clone(&self.relay);
                    let tx = tx.clone();
                    calls.spawn(async move {
                        tracing::debug!(tool, "tool call started");
                        let result = relay.call(tool, args).await;
                        tracing::debug!(tool, is_error = result.is_error, "tool call finished");
                        let resp = match serde_json::to_value(&result) {
                            Ok(value) => Response::success(id, value),
                            Err(e) => Response::error(id, INVALID_PARAMS, e.to_string()),
                        };
                        if let Ok(line) = serde_json::to_string(&resp) {
                            let _ = tx.send(line).await;
                        }
                    });
                }
            }
            // Reap finished calls so the set does not grow unbounded.
            while calls.try_join_next().is_some() {}
        }

        tracing::info!(in_flight = calls.len(), "MCP input closed");
        calls.shutdown().await;
        drop(tx);
        match writer_task.await {
            Ok(result) => result.map_err(McpError::from),
            Err(e) => Err(std::io::Error::other(e).into()),
        }
    }

    fn dispatch(&self, line: &str) -> Dispatch {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("unparsable MCP input: {e}");
                return Dispatch::Reply(Response::error(Value::Null, PARSE_ERROR, "Parse error"));
            }
        };
        if value.get("method").is_none() && (value.get("result").is_some() || value.get("error").is_some()) {
            // A response to a server-initiated request; none are sent.
            return Dispatch::Ignore;
        }
        let id_hint = value.get("id").cloned().unwrap_or(Value::Null);
        let request: Request = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Dispatch::Reply(Response::error(id_hint, INVALID_REQUEST, e.to_string()));
            }
        };

        let Some(id) = request.id.clone() else {
            tracing::debug!(method = %request.method, "notification");
            return Dispatch::Ignore;
        };

        match request.method.as_str() {
            "initialize" => {
                let version = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_PROTOCOL_VERSION);
                tracing::info!(protocol = version, "MCP client initialized");
                Dispatch::Reply(Response::success(
                    id,
                    json!({
                        "protocolVersion": version,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": SERVER_NAME, "version": self.version },
                    }),
                ))
            }
            "ping" => Dispatch::Reply(Response::success(id, json!({}))),
            "tools/list" => {
                let tools: Vec<Value> = catalog::tools().iter().map(|t| t.definition()).collect();
                Dispatch::Reply(Response::success(id, json!({ "tools": tools })))
            }
            "tools/call" => tool_call(id, request.params.as_ref()),
            other => Dispatch::Reply(Response::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }
}

fn tool_call(id: Value, params: Option<&Value>) -> Dispatch {
    let Some(name) = params.and_then(|p| p.get("name")).and_then(Value::as_str) else {
        return Dispatch::Reply(Response::error(id, INVALID_PARAMS, "Missing tool name"));
    };
    let Some(tool) = catalog::find(name) else {
        return Dispatch::Reply(Response::error(
            id,
            INVALID_PARAMS,
            format!("Unknown tool: {name}"),
        ));
    };
    match tool.validate(params.and_then(|p| p.get("arguments"))) {
        Ok(args) => Dispatch::Call {
            id,
            tool: tool.name,
            args,
        },
        Err(e) => {
            tracing::warn!(tool = tool.name, "rejected tool arguments: {e}");
            Dispatch::Reply(Response::error(
                id,
                INVALID_PARAMS,
                format!("Invalid arguments for tool {}: {e}", tool.name),
            ))
        }
    }
}

async fn write_responses<O>(mut writer: O, mut rx: mpsc::Receiver<String>) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
