//! Chrome launcher for the Kibbutz extension page.
//!
//! Implements the relay's [`PeerLauncher`] by opening the extension page
//! in a detached Chrome process. The page reads the relay port and the
//! pairing secret from its query string and connects back.

mod paths;

use std::path::PathBuf;
use std::process::Stdio;

use kibbutz_protocol::constants::{DEFAULT_EXTENSION_ID, EXTENSION_PAGE, extension_url};
use kibbutz_relay::{LaunchError, PeerLauncher};

pub use paths::find_chrome;

/// Launches Chrome on the extension's pairing page.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    extension_id: String,
    chrome_path: Option<PathBuf>,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION_ID, None)
    }
}

impl ChromeLauncher {
    /// `chrome_path` overrides executable discovery.
    pub fn new(extension_id: impl Into<String>, chrome_path: Option<PathBuf>) -> Self {
        Self {
            extension_id: extension_id.into(),
            chrome_path,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Builds the page URL carrying the relay port and pairing secret.
    pub fn pairing_url(&self, port: u16, token: &str) -> String {
        format!(
            "{}?wsPort={port}&token={token}",
            extension_url(&self.extension_id, EXTENSION_PAGE)
        )
    }
}

impl PeerLauncher for ChromeLauncher {
    fn launch(&self, port: u16, token: &str) -> Result<(), LaunchError> {
        let executable = find_chrome(self.chrome_path.as_deref())?;
        let url = self.pairing_url(port, token);

        let mut cmd = tokio::process::Command::new(&executable);
        cmd.arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        // The child is not awaited; it outlives the handle.
        let child = cmd.spawn()?;
        tracing::info!(
            executable = %executable.display(),
            pid = ?child.id(),
            port,
            "opened extension page in Chrome"
        );
        Ok(())
    }
}
