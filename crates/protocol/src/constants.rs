use std::fmt;
use std::time::Duration;

/// Upgrade path of the authenticated control channel.
pub const CONTROL_PATH: &str = "/ping";

/// Upgrade path of the data channel carrying relayed calls.
pub const DATA_PATH: &str = "/mcp";

/// How long a call waits for the peer to pair after a launch.
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the relay pings each live channel.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(10);

/// Read deadline for a channel.
///
/// Any incoming frame (pong, reply or peer ping) resets the deadline. If
/// nothing arrives within this window the peer is considered gone and the
/// channel is closed, which fails every outstanding call.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(30);

/// Maximum message size in bytes (16 MB).
///
/// Tab snapshots of large windows are the biggest replies seen in practice.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Chrome Web Store id of the companion extension.
pub const DEFAULT_EXTENSION_ID: &str = "bpfjmggaaiigpfahhmpmacfhlemnhhip";

/// Extension page that opens the WebSocket channels.
pub const EXTENSION_PAGE: &str = "kibbutz-mcp.html";

/// Extension page shown to users when the relay cannot reach the peer.
pub const TROUBLESHOOTING_PAGE: &str = "KIBBUTZ-MCP.html";

/// The two WebSocket endpoints a peer can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Liveness/authentication channel (`/ping`).
    Control,
    /// Call relay channel (`/mcp`).
    Data,
}

impl ChannelRole {
    /// Returns the upgrade path served for this role.
    pub fn path(self) -> &'static str {
        match self {
            ChannelRole::Control => CONTROL_PATH,
            ChannelRole::Data => DATA_PATH,
        }
    }

    /// Maps a request path to a role. Query strings are ignored.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path {
            CONTROL_PATH => Some(ChannelRole::Control),
            DATA_PATH => Some(ChannelRole::Data),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Control => write!(f, "control"),
            ChannelRole::Data => write!(f, "data"),
        }
    }
}

/// Returns the `chrome-extension://` URL of an extension page.
pub fn extension_url(extension_id: &str, page: &str) -> String {
    format!("chrome-extension://{extension_id}/{page}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_path() {
        assert_eq!(ChannelRole::from_path("/ping"), Some(ChannelRole::Control));
        assert_eq!(ChannelRole::from_path("/mcp"), Some(ChannelRole::Data));
        assert_eq!(
            ChannelRole::from_path("/ping?wsPort=1"),
            Some(ChannelRole::Control)
        );
        assert_eq!(ChannelRole::from_path("/"), None);
        assert_eq!(ChannelRole::from_path("/pingx"), None);
        assert_eq!(ChannelRole::from_path(""), None);
    }

    #[test]
    fn role_path_matches_from_path() {
        for role in [ChannelRole::Control, ChannelRole::Data] {
            assert_eq!(ChannelRole::from_path(role.path()), Some(role));
        }
    }

    #[test]
    fn role_display() {
        assert_eq!(ChannelRole::Control.to_string(), "control");
        assert_eq!(ChannelRole::Data.to_string(), "data");
    }

    #[test]
    fn extension_url_format() {
        assert_eq!(
            extension_url("abc", EXTENSION_PAGE),
            "chrome-extension://abc/kibbutz-mcp.html"
        );
    }
}
