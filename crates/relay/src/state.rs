//! Relay state machine.
//!
//! Every piece of process-wide relay state (secret, port, both channel
//! slots, the pending-call table and the pairing wait) lives in one
//! [`RelayState`]. It only changes through [`RelayState::apply`] and the
//! pairing helpers, always under the [`RelayCore`] mutex, which is never
//! held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kibbutz_protocol::{ChannelRole, RelayReply};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::RelayError;
use crate::connection::{ChannelHandler, ConnectionId, PeerConnection, SendError};
use crate::correlator::{Completion, Correlator};
use crate::token::{credential_matches, generate_token};

/// Lifecycle events consumed by [`RelayState::apply`].
#[derive(Debug)]
pub enum RelayEvent {
    ControlOpened(PeerConnection),
    ControlClosed(ConnectionId),
    DataOpened(PeerConnection),
    DataClosed(ConnectionId),
    ReplyReceived { id: String, result: Value },
}

/// Outcome of an upgrade request, decided before the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Control upgrade without the current secret (HTTP 401).
    Unauthorized,
    /// Data upgrade without a live control channel (HTTP 403).
    Forbidden,
}

/// An in-flight pairing attempt shared by every caller waiting on it.
#[derive(Debug)]
pub(crate) struct PairingWait {
    pub(crate) attempt: u64,
    pub(crate) deadline: Instant,
    paired: watch::Sender<bool>,
}

impl PairingWait {
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.paired.subscribe()
    }
}

/// Process-wide relay state.
#[derive(Default)]
pub struct RelayState {
    token: Option<String>,
    port: Option<u16>,
    control: Option<PeerConnection>,
    data: Option<PeerConnection>,
    pending: Correlator,
    pairing: Option<PairingWait>,
    next_attempt: u64,
    launches: u64,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared secret, if one has been generated.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns the shared secret, generating it on first use.
    pub fn ensure_token(&mut self) -> &str {
        self.token.get_or_insert_with(|| {
            tracing::debug!("generated pairing secret");
            generate_token()
        })
    }

    /// Returns the listening port, once bound.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Records the listening port. The first assignment wins.
    pub fn set_port(&mut self, port: u16) {
        if self.port.is_none() {
            self.port = Some(port);
        }
    }

    pub fn has_control(&self) -> bool {
        self.control.as_ref().is_some_and(PeerConnection::is_connected)
    }

    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(PeerConnection::is_connected)
    }

    /// Both channels are live and calls can be relayed.
    pub fn is_paired(&self) -> bool {
        self.has_control() && self.has_data()
    }

    pub fn pending(&self) -> &Correlator {
        &self.pending
    }

    /// Number of peer launches triggered so far.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing.is_some()
    }

    /// Decides whether an upgrade request on `role` may proceed.
    pub fn admit(&self, role: ChannelRole, credential: Option<&str>) -> Admission {
        match role {
            ChannelRole::Control => {
                if credential_matches(credential, self.token.as_deref()) {
                    Admission::Accept
                } else {
                    Admission::Unauthorized
                }
            }
            ChannelRole::Data => {
                if self.has_control() {
                    Admission::Accept
                } else {
                    Admission::Forbidden
                }
            }
        }
    }

    /// Applies a lifecycle event. Returns `false` if the event was ignored
    /// (stale connection, unknown reply id, or a data channel arriving
    /// after its control channel went away).
    pub fn apply(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::ControlOpened(conn) => {
                if let Some(old) = self.control.take() {
                    tracing::info!(old = old.id(), new = conn.id(), "evicting previous control channel");
                    old.close();
                    self.drop_data("control channel replaced");
                }
                tracing::info!(conn = conn.id(), remote = conn.remote_addr(), "control channel open");
                self.control = Some(conn);
                true
            }
            RelayEvent::ControlClosed(id) => {
                if self.control.as_ref().map(PeerConnection::id) != Some(id) {
                    return false;
                }
                if let Some(conn) = self.control.take() {
                    conn.close();
                }
                self.drop_data("control channel closed");
                true
            }
            RelayEvent::DataOpened(conn) => {
                if !self.has_control() {
                    tracing::warn!(conn = conn.id(), "control channel gone before data channel was installed");
                    conn.close();
                    return false;
                }
                self.drop_data("data channel replaced");
                tracing::info!(conn = conn.id(), remote = conn.remote_addr(), "data channel open");
                self.data = Some(conn);
                if let Some(wait) = self.pairing.take() {
                    tracing::debug!(attempt = wait.attempt, "pairing complete");
                    let _ = wait.paired.send(true);
                }
                true
            }
            RelayEvent::DataClosed(id) => {
                if self.data.as_ref().map(PeerConnection::id) != Some(id) {
                    return false;
                }
                self.drop_data("data channel closed");
                true
            }
            RelayEvent::ReplyReceived { id, result } => {
                let resolved = self.pending.resolve(&id, result);
                if !resolved {
                    tracing::debug!(%id, "dropping reply with no pending call");
                }
                resolved
            }
        }
    }

    /// Closes the data channel (if any) and fails every pending call.
    fn drop_data(&mut self, reason: &str) {
        if let Some(conn) = self.data.take() {
            tracing::info!(conn = conn.id(), reason, "closing data channel");
            conn.close();
        }
        let failed = self.pending.fail_all(RelayError::ChannelClosed);
        if failed > 0 {
            tracing::warn!(failed, reason, "failed outstanding calls");
        }
    }

    /// Registers a pending call and writes its frame to the data channel.
    pub(crate) fn dispatch(
        &mut self,
        id: String,
        frame: String,
        completion: Completion,
    ) -> Result<(), RelayError> {
        let sender = match self.data.as_ref() {
            Some(conn) if self.is_paired() => conn.sender(),
            _ => return Err(RelayError::NotConnected),
        };
        self.pending.register(id.clone(), completion);
        if let Err(e) = sender.send_text(frame) {
            self.pending.remove(&id);
            return Err(match e {
                SendError::Full => RelayError::SendBufferFull,
                SendError::Closed => RelayError::ChannelClosed,
            });
        }
        Ok(())
    }

    /// Drops a pending call whose caller stopped waiting for it.
    pub(crate) fn forget(&mut self, id: &str) -> bool {
        self.pending.remove(id)
    }

    /// Returns the current pairing wait, starting one if none is in flight.
    ///
    /// A wait past its deadline is abandoned (its launcher stopped waiting
    /// before ending it) and replaced. The flag is `true` when this call
    /// started the wait and must launch the peer.
    pub(crate) fn join_pairing(&mut self, now: Instant, timeout: Duration) -> (&PairingWait, bool) {
        if let Some(stale) = self.pairing.take_if(|w| w.deadline <= now) {
            tracing::debug!(attempt = stale.attempt, "replacing expired pairing wait");
        }
        let deadline = now + timeout;
        let started = self.pairing.is_none();
        if started {
            self.next_attempt += 1;
            self.launches += 1;
        }
        let attempt = self.next_attempt;
        let wait = self.pairing.get_or_insert_with(|| PairingWait {
            attempt,
            deadline,
            paired: watch::channel(false).0,
        });
        (wait, started)
    }

    /// Abandons pairing attempt `attempt`, releasing its waiters as failed.
    pub(crate) fn end_pairing(&mut self, attempt: u64) {
        if self.pairing.as_ref().is_some_and(|w| w.attempt == attempt) {
            self.pairing = None;
        }
    }

    /// Closes both channels, fails every pending call and drops any
    /// pairing wait.
    pub fn shutdown(&mut self) {
        if let Some(conn) = self.control.take() {
            conn.close();
        }
        self.drop_data("relay shutting down");
        self.pairing = None;
    }
}

/// Shared owner of the [`RelayState`].
///
/// Handed by `Arc` to the channel server, pairing manager and relay facade.
pub struct RelayCore {
    state: Mutex<RelayState>,
    next_conn: AtomicU64,
}

impl RelayCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RelayState::new()),
            next_conn: AtomicU64::new(1),
        })
    }

    /// Locks the state. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, RelayState> {
        // Transitions leave the state consistent even if a caller panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies one event under the lock.
    pub fn apply(&self, event: RelayEvent) -> bool {
        self.lock().apply(event)
    }

    pub fn is_paired(&self) -> bool {
        self.lock().is_paired()
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Tears down all live channels and outstanding calls.
    pub fn shutdown(&self) {
        tracing::info!("closing all peer channels");
        self.lock().shutdown();
    }
}

impl ChannelHandler for RelayCore {
    fn on_text(&self, conn: ConnectionId, role: ChannelRole, text: &str) {
        if role != ChannelRole::Data {
            tracing::trace!(conn, "ignoring control channel frame");
            return;
        }
        let Some(reply) = RelayReply::parse(text) else {
            tracing::debug!(conn, "dropping malformed data frame");
            return;
        };
        let mut state = self.lock();
        // Replies only count on the live data channel.
        if state.data.as_ref().map(PeerConnection::id) != Some(conn) {
            tracing::debug!(conn, "dropping reply from stale data channel");
            return;
        }
        state.apply(RelayEvent::ReplyReceived {
            id: reply.id,
            result: reply.result,
        });
    }

    fn on_closed(&self, conn: ConnectionId, role: ChannelRole) {
        let event = match role {
            ChannelRole::Control => RelayEvent::ControlClosed(conn),
            ChannelRole::Data => RelayEvent::DataClosed(conn),
        };
        self.apply(event);
    }
}
