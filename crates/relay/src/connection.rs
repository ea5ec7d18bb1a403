//! Peer channel connection: read/write pumps, keepalive, send buffering.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use kibbutz_protocol::constants::{WS_PING_PERIOD, WS_PONG_WAIT};
use kibbutz_protocol::ChannelRole;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;

/// Identifies one accepted connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Receives the inbound traffic and lifecycle of peer channels.
///
/// Methods are called from the read pump task and must not block.
pub trait ChannelHandler: Send + Sync + 'static {
    /// Called for every text frame received on a channel.
    fn on_text(&self, conn: ConnectionId, role: ChannelRole, text: &str);

    /// Called once when a channel's read pump stops, for any reason.
    fn on_closed(&self, conn: ConnectionId, role: ChannelRole);
}

/// Handle for sending frames to a connected peer channel.
///
/// Cloneable and cheap: wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

impl Sender {
    /// Queues a text frame.
    ///
    /// Returns `Err` if the buffer is full or the channel is closed.
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx
            .try_send(WsMessage::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("send buffer full, dropping frame");
                    SendError::Full
                }
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Returns `true` while the channel can still carry frames.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send buffer full")]
    Full,

    #[error("connection closed")]
    Closed,
}

/// An accepted peer channel.
///
/// Owns the read/write pump tasks through its cancel token; dropping the
/// handle does not close the socket, [`close`](Self::close) does.
pub struct PeerConnection {
    id: ConnectionId,
    role: ChannelRole,
    remote_addr: String,
    sender: Sender,
    cancel: CancellationToken,
}

impl PeerConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Returns a cloneable [`Sender`] for this channel.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Force-closes the channel. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Creates a connection with no socket behind it.
    ///
    /// Frames sent on it land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(
        id: ConnectionId,
        role: ChannelRole,
    ) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let cancel = CancellationToken::new();
        let conn = Self {
            id,
            role,
            remote_addr: "detached".into(),
            sender: Sender {
                tx,
                cancel: cancel.clone(),
            },
            cancel,
        };
        (conn, rx)
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Runs the read and write pumps for an upgraded WebSocket.
///
/// The pumps run as background tokio tasks and stop when the socket closes,
/// the keepalive deadline passes, or the connection (or the server) is
/// cancelled. [`ChannelHandler::on_closed`] fires exactly once afterwards.
pub(crate) fn spawn_connection<S, H>(
    ws_stream: S,
    id: ConnectionId,
    role: ChannelRole,
    remote_addr: String,
    handler: Arc<H>,
    server_cancel: &CancellationToken,
) -> PeerConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: ChannelHandler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender {
        tx,
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    let read_sender = sender.clone();
    let addr = remote_addr.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, id, role, read_sender, &handler, read_cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        read_cancel.cancel();
        handler.on_closed(id, role);
        tracing::info!(conn = id, %role, remote = %addr, "channel closed");
    });

    PeerConnection {
        id,
        role,
        remote_addr,
        sender,
        cancel,
    }
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::debug!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::debug!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and hands text frames to the handler.
///
/// Any incoming frame resets the read deadline; silence for
/// [`WS_PONG_WAIT`] means the peer is gone.
async fn read_pump<S, H>(
    mut stream: S,
    id: ConnectionId,
    role: ChannelRole,
    sender: Sender,
    handler: &Arc<H>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: ChannelHandler,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                tracing::warn!(conn = id, %role, "read deadline passed, closing channel");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match ws_msg {
                            WsMessage::Text(text) => handler.on_text(id, role, text.as_str()),
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Binary(_) => {
                                tracing::trace!(conn = id, %role, "ignoring binary frame");
                            }
                            WsMessage::Close(_) => {
                                tracing::debug!(conn = id, %role, "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(conn = id, %role, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
