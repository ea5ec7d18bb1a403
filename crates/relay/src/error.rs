//! Error types for the relay engine.

use std::sync::Arc;

/// Why a relayed call or a pairing attempt did not produce a result.
///
/// Cloneable so that one channel failure can settle every pending call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("peer did not connect before the pairing timeout")]
    PairingTimeout,

    #[error("pairing attempt abandoned")]
    PairingFailed,

    #[error("failed to launch peer: {0}")]
    Launch(Arc<LaunchError>),

    #[error("channel server is not listening")]
    NotListening,

    #[error("peer is not connected")]
    NotConnected,

    #[error("channel closed")]
    ChannelClosed,

    #[error("send buffer full, peer is not keeping up")]
    SendBufferFull,

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

impl From<LaunchError> for RelayError {
    fn from(e: LaunchError) -> Self {
        Self::Launch(Arc::new(e))
    }
}

/// Errors produced while starting the peer process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("browser executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("failed to spawn browser: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors produced by the channel server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_closed_reads_as_such() {
        assert_eq!(RelayError::ChannelClosed.to_string(), "channel closed");
    }

    #[test]
    fn launch_error_converts() {
        let err: RelayError = LaunchError::ExecutableNotFound("/opt/chrome".into()).into();
        assert!(err.to_string().contains("/opt/chrome"));
        let cloned = err.clone();
        assert!(matches!(cloned, RelayError::Launch(_)));
    }

    #[test]
    fn json_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: RelayError = parse.into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
