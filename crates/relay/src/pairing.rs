//! On-demand peer launch and the coalesced pairing wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::state::RelayCore;
use crate::{LaunchError, RelayError};

/// Starts the peer process so that it connects back to the relay.
///
/// Fire-and-forget: success only means the process was started. The relay
/// observes the outcome through the channels the peer opens.
pub trait PeerLauncher: Send + Sync + 'static {
    fn launch(&self, port: u16, token: &str) -> Result<(), LaunchError>;
}

/// Pairs the relay with its peer on demand.
pub struct PairingManager {
    core: Arc<RelayCore>,
    launcher: Arc<dyn PeerLauncher>,
    timeout: Duration,
}

impl PairingManager {
    pub fn new(core: Arc<RelayCore>, launcher: Arc<dyn PeerLauncher>, timeout: Duration) -> Self {
        Self {
            core,
            launcher,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits until the data channel is up, launching the peer if needed.
    ///
    /// Concurrent callers share a single wait and a single launch. The wait
    /// is bounded by the configured timeout; on expiry every caller gets
    /// [`RelayError::PairingTimeout`] and the next call starts a new attempt
    /// with the same secret.
    pub async fn ensure_paired(&self) -> Result<(), RelayError> {
        let (mut paired, deadline, attempt, launch) = {
            let mut state = self.core.lock();
            let token = state.ensure_token().to_string();
            if state.is_paired() {
                return Ok(());
            }
            let port = state.port().ok_or(RelayError::NotListening)?;
            let (wait, started) = state.join_pairing(Instant::now(), self.timeout);
            (
                wait.subscribe(),
                wait.deadline,
                wait.attempt,
                started.then_some((port, token)),
            )
        };

        if let Some((port, token)) = launch {
            tracing::info!(port, attempt, "launching peer");
            if let Err(e) = self.launcher.launch(port, &token) {
                tracing::warn!(attempt, "peer launch failed: {e}");
                self.core.lock().end_pairing(attempt);
                return Err(RelayError::Launch(Arc::new(e)));
            }
        } else {
            tracing::debug!(attempt, "joining pairing attempt in flight");
        }

        let outcome = tokio::time::timeout_at(deadline, paired.wait_for(|ok| *ok))
            .await
            .map(|r| r.is_ok());
        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(RelayError::PairingFailed),
            Err(_) => {
                self.core.lock().end_pairing(attempt);
                tracing::warn!(attempt, timeout = ?self.timeout, "peer did not pair in time");
                Err(RelayError::PairingTimeout)
            }
        }
    }
}
