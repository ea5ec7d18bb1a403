//! Tool-call result shape returned to the control interface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{TROUBLESHOOTING_PAGE, extension_url};

/// A single content block of a [`CallResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// Result of a relayed call.
///
/// Failures the user can act on (peer not running, channel dropped) are
/// reported as a normal value with `is_error` set, never as a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallResult {
    /// Wraps a peer result as pretty-printed JSON text.
    pub fn success(result: &Value) -> Self {
        let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        Self {
            content: vec![Content::Text { text }],
            is_error: false,
        }
    }

    /// Creates a soft-failure result with the given diagnostic.
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Soft failure returned when the peer cannot be reached.
    pub fn connection_failed(extension_id: &str) -> Self {
        Self::failure(format!(
            "Connection failed: The MCP server cannot reach the Chrome extension. \
             Open {} for troubleshooting.",
            extension_url(extension_id, TROUBLESHOOTING_PAGE)
        ))
    }

    /// Returns the text of the first content block.
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(|c| match c {
            Content::Text { text } => text.as_str(),
        })
    }
}
