//! Channel server.
//!
//! Listens on one TCP port and upgrades `GET /ping` (control) and
//! `GET /mcp` (data) to WebSocket. Admission is decided during the
//! handshake against the shared [`RelayCore`]; any other request is
//! dropped without a response.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kibbutz_protocol::ChannelRole;
use kibbutz_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection;
use crate::state::{Admission, RelayCore, RelayEvent};

/// How long a client may take to send its request line.
const REQUEST_LINE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the bytes inspected to find the request line.
const REQUEST_LINE_MAX: usize = 2048;

const PEEK_RETRY: Duration = Duration::from_millis(10);

/// Where an inbound request is headed, judged from its request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// The request line has not fully arrived yet.
    Incomplete,
    Channel(ChannelRole),
    Unknown,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 0).into(),
        }
    }
}

/// The relay's WebSocket endpoint pair.
pub struct ChannelServer {
    core: Arc<RelayCore>,
    listener: TcpListener,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ChannelServer {
    /// Binds the listening socket and records its port in the relay state.
    pub async fn bind(config: ServerConfig, core: Arc<RelayCore>) -> Result<Arc<Self>, ServerError> {
        let listener = TcpListener::bind(config.addr).await?;
        let local_addr = listener.local_addr()?;
        core.lock().set_port(local_addr.port());
        tracing::info!("channel server listening on {local_addr}");

        Ok(Arc::new(Self {
            core,
            listener,
            local_addr,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting and closes every live channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.core.shutdown();
    }

    /// Accepts connections until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("channel server shutting down");
                    break Ok(());
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::debug!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Routes, authenticates and upgrades one TCP connection.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let role = match peek_route(&stream).await? {
            Route::Channel(role) => role,
            Route::Incomplete | Route::Unknown => {
                tracing::debug!(%peer_addr, "dropping request for unknown path");
                return Ok(());
            }
        };

        let core = Arc::clone(&self.core);
        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            let offered = req.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned();
            let credential = offered.as_ref().and_then(|v| v.to_str().ok());
            match core.lock().admit(role, credential) {
                Admission::Accept => {
                    // Clients drop the socket unless the offered protocol is echoed.
                    if let Some(value) = offered {
                        resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                    }
                    Ok(resp)
                }
                Admission::Unauthorized => Err(reject(StatusCode::UNAUTHORIZED)),
                Admission::Forbidden => Err(reject(StatusCode::FORBIDDEN)),
            }
        };

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
            Ok(ws) => ws,
            Err(tungstenite::Error::Http(resp)) => {
                tracing::warn!(%peer_addr, %role, status = %resp.status(), "refused channel upgrade");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let conn = connection::spawn_connection(
            ws_stream,
            self.core.next_connection_id(),
            role,
            peer_addr.to_string(),
            Arc::clone(&self.core),
            &self.cancel,
        );
        let event = match role {
            ChannelRole::Control => RelayEvent::ControlOpened(conn),
            ChannelRole::Data => RelayEvent::DataOpened(conn),
        };
        self.core.apply(event);
        Ok(())
    }
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut resp = ErrorResponse::new(None);
    *resp.status_mut() = status;
    resp
}

/// Waits until the request line is readable without consuming it.
async fn peek_route(stream: &TcpStream) -> Result<Route, ServerError> {
    let mut buf = [0u8; REQUEST_LINE_MAX];
    let deadline = tokio::time::Instant::now() + REQUEST_LINE_TIMEOUT;
    loop {
        let n = match tokio::time::timeout_at(deadline, stream.peek(&mut buf)).await {
            Ok(n) => n?,
            Err(_) => return Ok(Route::Incomplete),
        };
        if n == 0 {
            return Ok(Route::Unknown);
        }
        match route_request(&buf[..n]) {
            Route::Incomplete if n < buf.len() => {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(Route::Incomplete);
                }
                tokio::time::sleep(PEEK_RETRY).await;
            }
            Route::Incomplete => return Ok(Route::Unknown),
            route => return Ok(route),
        }
    }
}

/// Classifies a request from the start of its bytes.
fn route_request(head: &[u8]) -> Route {
    let Some(end) = head.windows(2).position(|w| w == b"\r\n") else {
        return Route::Incomplete;
    };
    let Ok(line) = std::str::from_utf8(&head[..end]) else {
        return Route::Unknown;
    };
    let mut parts = line.split_ascii_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("GET"), Some(target), Some(version)) if version.starts_with("HTTP/") => {
            ChannelRole::from_path(target).map_or(Route::Unknown, Route::Channel)
        }
        _ => Route::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use kibbutz_protocol::RelayRequest;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    #[test]
    fn routes_known_paths() {
        assert_eq!(
            route_request(b"GET /ping HTTP/1.1\r\nHost: x\r\n"),
            Route::Channel(ChannelRole::Control)
        );
        assert_eq!(
            route_request(b"GET /mcp?v=1 HTTP/1.1\r\n"),
            Route::Channel(ChannelRole::Data)
        );
    }

    #[test]
    fn routes_everything_else_nowhere() {
        assert_eq!(route_request(b"GET / HTTP/1.1\r\n"), Route::Unknown);
        assert_eq!(route_request(b"GET /pingx HTTP/1.1\r\n"), Route::Unknown);
        assert_eq!(route_request(b"POST /ping HTTP/1.1\r\n"), Route::Unknown);
        assert_eq!(route_request(b"GET /ping\r\n"), Route::Unknown);
        assert_eq!(route_request(b"\xff\xfe\r\n"), Route::Unknown);
        assert_eq!(route_request(b"GET /ping HTT"), Route::Incomplete);
    }

    async fn start() -> (Arc<ChannelServer>, String) {
        let core = RelayCore::new();
        let server = ChannelServer::bind(ServerConfig::default(), core).await.unwrap();
        let s = Arc::clone(&server);
        tokio::spawn(async move { s.run().await });
        let token = server.core.lock().ensure_token().to_string();
        (server, token)
    }

    async fn connect(
        server: &ChannelServer,
        role: ChannelRole,
        credential: Option<&str>,
    ) -> Result<Client, tungstenite::Error> {
        let url = format!("ws://127.0.0.1:{}{}", server.port(), role.path());
        let mut request = url.into_client_request()?;
        if let Some(value) = credential {
            request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, value.parse().unwrap());
        }
        connect_async(request).await.map(|(ws, _)| ws)
    }

    fn refused_with(result: Result<Client, tungstenite::Error>, status: StatusCode) {
        match result {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), status),
            Err(e) => panic!("expected HTTP {status}, got {e}"),
            Ok(_) => panic!("expected HTTP {status}, upgrade succeeded"),
        }
    }

    /// Polls until `check` holds; the server installs channels asynchronously.
    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Reads until the server closes `ws`; `false` if it stays open.
    async fn closed_by_server(ws: &mut Client) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn control_requires_the_secret() {
        let (server, token) = start().await;

        refused_with(connect(&server, ChannelRole::Control, None).await, StatusCode::UNAUTHORIZED);
        refused_with(
            connect(&server, ChannelRole::Control, Some("nope")).await,
            StatusCode::UNAUTHORIZED,
        );
        assert!(!server.core.lock().has_control());

        let _control = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn data_requires_live_control() {
        let (server, token) = start().await;

        refused_with(connect(&server, ChannelRole::Data, None).await, StatusCode::FORBIDDEN);
        refused_with(
            connect(&server, ChannelRole::Data, Some(&token)).await,
            StatusCode::FORBIDDEN,
        );

        let _control = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        let _data = connect(&server, ChannelRole::Data, None).await.unwrap();
        eventually(|| server.core.is_paired()).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn second_control_evicts_the_first() {
        let (server, token) = start().await;

        let mut first = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        let _data = connect(&server, ChannelRole::Data, None).await.unwrap();
        eventually(|| server.core.is_paired()).await;

        let _second = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control() && !server.core.lock().has_data()).await;

        // The evicted socket is closed by the server.
        assert!(closed_by_server(&mut first).await);
        assert!(server.core.lock().has_control());
        server.shutdown();
    }

    #[tokio::test]
    async fn unknown_path_is_dropped_without_response() {
        let (server, _token) = start().await;

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /other HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
        match read {
            Ok(Ok(_)) | Ok(Err(_)) => assert!(buf.is_empty()),
            Err(_) => panic!("connection was not closed"),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn data_channel_carries_relayed_frames_and_replies() {
        let (server, token) = start().await;

        let _control = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        let mut data = connect(&server, ChannelRole::Data, None).await.unwrap();
        eventually(|| server.core.is_paired()).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let frame = serde_json::to_string(&RelayRequest::new("c1", "SNAPSHOT_MCP", json!({}))).unwrap();
        server.core.lock().dispatch("c1".into(), frame, tx).unwrap();

        let request: RelayRequest = loop {
            match data.next().await {
                Some(Ok(WsMessage::Text(text))) => break serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        };
        assert_eq!(request.id, "c1");
        assert_eq!(request.message, "SNAPSHOT_MCP");

        data.send(WsMessage::Text(r#"{"id":"c1","result":{"tabs":[]}}"#.into()))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!({"tabs": []}));
        server.shutdown();
    }

    #[tokio::test]
    async fn shutdown_closes_live_channels() {
        let (server, token) = start().await;

        let mut control = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        let mut data = connect(&server, ChannelRole::Data, None).await.unwrap();
        eventually(|| server.core.is_paired()).await;

        server.shutdown();

        assert!(closed_by_server(&mut control).await);
        assert!(closed_by_server(&mut data).await);
        assert!(!server.core.is_paired());
        assert!(!server.core.lock().has_control());
    }

    #[tokio::test]
    async fn control_disconnect_cascades_to_data() {
        let (server, token) = start().await;

        let mut control = connect(&server, ChannelRole::Control, Some(&token)).await.unwrap();
        eventually(|| server.core.lock().has_control()).await;
        let _data = connect(&server, ChannelRole::Data, None).await.unwrap();
        eventually(|| server.core.is_paired()).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        server.core.lock().dispatch("c1".into(), "{}".into(), tx).unwrap();

        control.close(None).await.unwrap();
        assert!(matches!(
            rx.await.unwrap(),
            Err(crate::RelayError::ChannelClosed)
        ));
        eventually(|| !server.core.lock().has_control() && !server.core.lock().has_data()).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn accepted_upgrade_echoes_the_protocol() {
        let (server, token) = start().await;

        let url = format!("ws://127.0.0.1:{}/ping", server.port());
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, token.parse().unwrap());
        let (_ws, resp) = connect_async(request).await.unwrap();
        assert_eq!(
            resp.headers().get(SEC_WEBSOCKET_PROTOCOL).and_then(|v| v.to_str().ok()),
            Some(token.as_str())
        );
        server.shutdown();
    }
}
