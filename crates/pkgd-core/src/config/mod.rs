//! Daemon configuration.
//!
//! Parsed from a TOML file at startup and fixed for the lifetime of the
//! process. Every section is optional; missing values fall back to the
//! defaults below.
//!
//! ```toml
//! [daemon]
//! socket = "/run/pkgd/pkgd.sock"
//!
//! [watchdog]
//! idle_timeout = 20
//! locked_timeout = 600
//!
//! [authorization]
//! allowed_gids = [10]
//!
//! [engine]
//! catalog = "/var/lib/pkgd/catalog.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::DEFAULT_SOCKET_PATH;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PkgdConfig {
    /// Socket and process files.
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Idle/locked watchdog.
    #[serde(default)]
    pub watchdog: WatchdogSection,

    /// Transport deadlines.
    #[serde(default)]
    pub timeouts: TimeoutSection,

    /// Authorization policy.
    #[serde(default)]
    pub authorization: AuthorizationSection,

    /// Engine backend.
    #[serde(default)]
    pub engine: EngineSection,
}

impl PkgdConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog.idle_timeout == 0 {
            return Err(ConfigError::Validation(
                "watchdog.idle_timeout must be at least 1 tick".to_string(),
            ));
        }
        if self.watchdog.locked_timeout == 0 {
            return Err(ConfigError::Validation(
                "watchdog.locked_timeout must be at least 1 tick".to_string(),
            ));
        }
        if self.watchdog.tick_ms == 0 {
            return Err(ConfigError::Validation(
                "watchdog.tick_ms must be positive".to_string(),
            ));
        }
        if self.timeouts.call_secs == 0 || self.timeouts.run_secs == 0 {
            return Err(ConfigError::Validation(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Socket and process file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// Path of the listening socket.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Permission bits applied to the socket after binding.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Optional PID file.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            socket_mode: default_socket_mode(),
            pid_file: None,
        }
    }
}

/// Watchdog thresholds, in ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WatchdogSection {
    /// Idle ticks before an unlocked daemon exits.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Idle ticks before a locked but inactive daemon exits.
    #[serde(default = "default_locked_timeout")]
    pub locked_timeout: u64,

    /// Tick period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Run without a watchdog.
    #[serde(default)]
    pub disabled: bool,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            locked_timeout: default_locked_timeout(),
            tick_ms: default_tick_ms(),
            disabled: false,
        }
    }
}

/// Per-call deadlines enforced at the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    /// Deadline for privileged calls, seconds.
    #[serde(default = "default_call_secs")]
    pub call_secs: u64,

    /// Deadline for `RunTransaction`, seconds.
    #[serde(default = "default_run_secs")]
    pub run_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            call_secs: default_call_secs(),
            run_secs: default_run_secs(),
        }
    }
}

/// Peer-credential authorization policy. Root is always allowed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationSection {
    /// User ids allowed to run privileged operations.
    #[serde(default)]
    pub allowed_uids: Vec<u32>,

    /// Group ids allowed to run privileged operations.
    #[serde(default)]
    pub allowed_gids: Vec<u32>,
}

/// Engine backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Package catalog consumed by the catalog engine.
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,

    /// Engine lock file; defaults to `<catalog>.lock`.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            lock_file: None,
        }
    }
}

impl EngineSection {
    /// Resolved engine lock file path.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file.clone().unwrap_or_else(|| {
            let mut name = self.catalog.as_os_str().to_os_string();
            name.push(".lock");
            PathBuf::from(name)
        })
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

const fn default_socket_mode() -> u32 {
    0o666
}

const fn default_idle_timeout() -> u64 {
    20
}

const fn default_locked_timeout() -> u64 {
    600
}

const fn default_tick_ms() -> u64 {
    1000
}

const fn default_call_secs() -> u64 {
    600
}

const fn default_run_secs() -> u64 {
    3600
}

fn default_catalog() -> PathBuf {
    PathBuf::from("/var/lib/pkgd/catalog.json")
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PkgdConfig::from_toml("").unwrap();
        assert_eq!(config.daemon.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.watchdog.idle_timeout, 20);
        assert_eq!(config.watchdog.locked_timeout, 600);
        assert_eq!(config.watchdog.tick_ms, 1000);
        assert!(!config.watchdog.disabled);
        assert_eq!(config.timeouts.call_secs, 600);
        assert_eq!(config.timeouts.run_secs, 3600);
        assert!(config.authorization.allowed_uids.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = PkgdConfig::from_toml(
            r#"
            [daemon]
            socket = "/tmp/pkgd.sock"

            [watchdog]
            idle_timeout = 5
            disabled = true

            [authorization]
            allowed_uids = [1000]
            allowed_gids = [10]

            [engine]
            catalog = "/srv/catalog.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.daemon.socket, PathBuf::from("/tmp/pkgd.sock"));
        assert_eq!(config.watchdog.idle_timeout, 5);
        assert_eq!(config.watchdog.locked_timeout, 600);
        assert!(config.watchdog.disabled);
        assert_eq!(config.authorization.allowed_uids, vec![1000]);
        assert_eq!(
            config.engine.lock_path(),
            PathBuf::from("/srv/catalog.json.lock")
        );
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let err = PkgdConfig::from_toml("[watchdog]\nidle_timeout = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = PkgdConfig::from_toml("[daemon]\neval = \"rm -rf /\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PkgdConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(PkgdConfig::from_toml(&text).unwrap(), config);
    }
}
