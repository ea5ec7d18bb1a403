//! Server configuration.
//!
//! Configuration is read from TOML:
//! - `$KIBBUTZ_CONFIG` when set
//! - Windows: `%APPDATA%/kibbutz/mcp.toml`
//! - elsewhere: `~/.config/kibbutz/mcp.toml`
//!
//! A missing file means defaults; every field is optional.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kibbutz_protocol::constants::{DEFAULT_EXTENSION_ID, PAIRING_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "KIBBUTZ_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the channel server listens on.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Channel server port (0 = auto-assign).
    #[serde(default)]
    pub port: u16,

    /// How long a call waits for the extension to pair after a launch.
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,

    /// Id of the Chrome extension to open.
    #[serde(default = "default_extension_id")]
    pub extension_id: String,

    /// Chrome executable, skipping discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_pairing_timeout_ms() -> u64 {
    PAIRING_TIMEOUT.as_millis() as u64
}

fn default_extension_id() -> String {
    DEFAULT_EXTENSION_ID.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: 0,
            pairing_timeout_ms: default_pairing_timeout_ms(),
            extension_id: default_extension_id(),
            chrome_path: None,
        }
    }
}

impl Config {
    /// Loads the configuration from its platform location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads the configuration at `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid configuration {}: {e}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    #[cfg(windows)]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("kibbutz").join("mcp.toml")
    }

    #[cfg(not(windows))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("kibbutz")
            .join("mcp.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 0);
        assert_eq!(config.pairing_timeout(), Duration::from_secs(2));
        assert_eq!(config.extension_id, DEFAULT_EXTENSION_ID);
        assert!(config.chrome_path.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("pairing_timeout_ms = 5000").unwrap();
        assert_eq!(config.pairing_timeout(), Duration::from_secs(5));
        assert_eq!(config.port, 0);
        assert_eq!(config.extension_id, DEFAULT_EXTENSION_ID);
    }

    #[test]
    fn full_toml() {
        let toml_str = r#"
            bind_address = "0.0.0.0"
            port = 7777
            pairing_timeout_ms = 1500
            extension_id = "abcdef"
            chrome_path = "/usr/bin/chromium"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 7777);
        assert_eq!(config.extension_id, "abcdef");
        assert_eq!(config.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn missing_file_means_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp.toml");
        std::fs::write(&path, "port = 9000\nextension_id = \"dev-build\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.extension_id, "dev-build");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp.toml");
        std::fs::write(&path, "port = \"not a port\"").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn roundtrip_toml() {
        let config = Config {
            port: 1234,
            chrome_path: Some("/opt/chrome".into()),
            ..Config::default()
        };
        let parsed: Config = toml::from_str(&toml::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_path_names_kibbutz() {
        if std::env::var_os(CONFIG_ENV).is_none() {
            assert!(config_path().to_string_lossy().contains("kibbutz"));
        }
    }
}
