//! Relay facade used by the tool catalog.

use std::sync::Arc;

use kibbutz_protocol::{CallResult, RelayRequest};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::RelayError;
use crate::pairing::PairingManager;
use crate::state::RelayCore;

/// Forwards calls to the peer, pairing with it on demand.
pub struct Relay {
    core: Arc<RelayCore>,
    pairing: PairingManager,
    extension_id: String,
}

impl Relay {
    pub fn new(core: Arc<RelayCore>, pairing: PairingManager, extension_id: impl Into<String>) -> Self {
        Self {
            core,
            pairing,
            extension_id: extension_id.into(),
        }
    }

    pub fn core(&self) -> &Arc<RelayCore> {
        &self.core
    }

    /// Relays a call and reports every failure as a soft-failure result.
    pub async fn call(&self, message: &str, args: Value) -> CallResult {
        match self.request(message, args).await {
            Ok(result) => CallResult::success(&result),
            Err(RelayError::NotConnected) => CallResult::connection_failed(&self.extension_id),
            Err(e) => {
                tracing::warn!(message, "relayed call failed: {e}");
                CallResult::failure(format!("Call failed: {e}"))
            }
        }
    }

    /// Relays a call and waits for the peer's reply.
    ///
    /// There is no per-call timeout: the call settles when the peer replies
    /// or when the data channel closes.
    pub async fn request(&self, message: &str, args: Value) -> Result<Value, RelayError> {
        if !self.core.is_paired() {
            if let Err(e) = self.pairing.ensure_paired().await {
                tracing::debug!(message, "pairing failed: {e}");
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&RelayRequest::new(id.as_str(), message, args))?;
        let (tx, rx) = oneshot::channel();
        self.core.lock().dispatch(id.clone(), frame, tx)?;
        tracing::debug!(%id, message, "call relayed");

        let mut guard = PendingGuard {
            core: &self.core,
            id: Some(id),
        };
        let outcome = rx.await.unwrap_or(Err(RelayError::ChannelClosed));
        guard.disarm();
        outcome
    }
}

/// Drops the pending entry of a call whose caller went away before it settled.
struct PendingGuard<'a> {
    core: &'a RelayCore,
    id: Option<String>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.core.lock().forget(&id) {
                tracing::debug!(%id, "abandoned call forgotten");
            }
        }
    }
}
