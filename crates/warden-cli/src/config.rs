//! RON configuration for the `warden` binary.
//!
//! ```ron
//! (
//!     data_dir: "/var/lib/warden",
//!     remote_root: "/srv/warden",
//!     own_package: "org.warden.agent",
//!     sync_interval_secs: 86400,
//!     live_listener: true,
//!     adb: (serial: Some("emulator-5554")),
//! )
//! ```
//!
//! Every field is optional. A missing default config file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_client::constants::{DEFAULT_INSTALL_SCAN, DEFAULT_SYNC_INTERVAL, DEFAULT_SYNC_TIMEOUT};

/// Package name the agent runs as. Never blocklisted, never uninstalled.
pub const DEFAULT_OWN_PACKAGE: &str = "org.warden.agent";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blocklist, bug flags, and the generated device id live here.
    pub data_dir: PathBuf,
    /// Root of the filesystem document store.
    pub remote_root: PathBuf,
    pub own_package: String,
    /// Use this device key instead of asking the platform.
    pub device_id: Option<String>,
    pub sync_interval_secs: u64,
    pub sync_timeout_secs: u64,
    /// 0 disables install scanning.
    pub install_scan_secs: u64,
    /// Follow the device document live while the agent runs.
    pub live_listener: bool,
    pub adb: AdbConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub program: String,
    /// Device serial for `adb -s`. Needed when several devices are attached.
    pub serial: Option<String>,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self { program: "adb".into(), serial: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: base.join("warden"),
            remote_root: base.join("warden-remote"),
            own_package: DEFAULT_OWN_PACKAGE.into(),
            device_id: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL.as_secs(),
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT.as_secs(),
            install_scan_secs: DEFAULT_INSTALL_SCAN.as_secs(),
            live_listener: false,
            adb: AdbConfig::default(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/warden/config.ron` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("warden").join("config.ron"))
    }

    /// Load `path`, or the default path when `None`. Only a missing default
    /// file falls back to defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs.max(1))
    }

    pub fn install_scan(&self) -> Option<Duration> {
        (self.install_scan_secs > 0).then(|| Duration::from_secs(self.install_scan_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse(
            r#"(own_package: "com.parent.agent", live_listener: true, adb: (serial: Some("abc")))"#,
        )
        .unwrap();
        assert_eq!(config.own_package, "com.parent.agent");
        assert!(config.live_listener);
        assert_eq!(config.adb.program, "adb");
        assert_eq!(config.adb.serial.as_deref(), Some("abc"));
        assert_eq!(config.sync_interval(), DEFAULT_SYNC_INTERVAL);
    }

    #[test]
    fn test_zero_scan_disables() {
        let config = Config::parse("(install_scan_secs: 0)").unwrap();
        assert!(config.install_scan().is_none());
    }

    #[test]
    fn test_bad_ron_is_reported() {
        assert!(matches!(Config::parse("(own_package: 7)"), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.ron"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, r#"(data_dir: "/tmp/w", sync_timeout_secs: 5)"#).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/w"));
        assert_eq!(config.sync_timeout(), Duration::from_secs(5));
    }
}
