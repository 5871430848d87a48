//! Runtime configuration shared by every clipsync component.
//!
//! A [`SyncConfig`] is built once at startup, validated, and then handed to
//! each component as an `Arc<SyncConfig>`.  Nothing mutates it afterwards:
//! the `with_*` setters are pure and return a new, validated value.
//!
//! The configuration can optionally be read from a TOML file.  Every field
//! has a default, so a file only needs to mention what it overrides:
//!
//! ```toml
//! tcp_port = 9000
//! history_size = 25
//! trusted_devices = ["192.168.1.20"]
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  This keeps old
//! config files working when new fields are introduced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest port a user may configure.  Ports below this are privileged.
pub const MIN_PORT: u16 = 1024;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A port setting is outside the allowed `1024..=65535` range.
    #[error("{name} port must be between 1024 and 65535, got {port}")]
    PortOutOfRange { name: &'static str, port: u16 },

    /// A numeric setting that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Protocol constants and tunables for one clipsync process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// TCP port of the transport server.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Ports probed in order when `tcp_port` is already in use.
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<u16>,
    /// UDP port shared by discovery requests and responses.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// How often a client re-broadcasts its discovery request.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Clipboard polling period.
    #[serde(default = "default_clipboard_poll_ms")]
    pub clipboard_poll_interval_ms: u64,
    /// How long change detection stays paused after a synchronized write.
    #[serde(default = "default_resume_delay_ms")]
    pub resume_delay_ms: u64,
    /// Literal payload of a discovery request datagram.
    #[serde(default = "default_discovery_message")]
    pub discovery_message: String,
    /// Prefix of a discovery response datagram.
    #[serde(default = "default_discovery_response_prefix")]
    pub discovery_response_prefix: String,
    /// Largest image payload (in bytes, before base64) that will be sent.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Largest encrypted frame accepted from a socket before it is dropped.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Sub-directory of the OS temp dir where received images are written.
    /// An absolute path is used as is.
    #[serde(default = "default_temp_folder")]
    pub temp_folder: String,
    /// Number of entries retained by the history store.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Password used when none is supplied on the command line.
    #[serde(default = "default_password")]
    pub default_password: String,
    /// IP addresses allowed to connect.  Empty means everyone is allowed.
    #[serde(default)]
    pub trusted_devices: Vec<String>,
    /// Consecutive failed connection attempts before the client gives up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Delay between client reconnection attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Client keepalive ping period.  `0` disables keepalive pings.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_tcp_port() -> u16 {
    8888
}
fn default_fallback_ports() -> Vec<u16> {
    vec![8889, 8890, 8891, 8892, 8893]
}
fn default_udp_port() -> u16 {
    41234
}
fn default_broadcast_interval_ms() -> u64 {
    5_000
}
fn default_clipboard_poll_ms() -> u64 {
    1_000
}
fn default_resume_delay_ms() -> u64 {
    500
}
fn default_discovery_message() -> String {
    "CLIPBOARD_SYNC_DISCOVERY".to_string()
}
fn default_discovery_response_prefix() -> String {
    "CLIPBOARD_SYNC_SERVER".to_string()
}
fn default_max_file_size() -> usize {
    1024 * 1024
}
fn default_max_frame_len() -> usize {
    8 * 1024 * 1024
}
fn default_temp_folder() -> String {
    "clipboard_sync_temp".to_string()
}
fn default_history_size() -> usize {
    10
}
fn default_password() -> String {
    "clipboard-sync-default-password".to_string()
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            fallback_ports: default_fallback_ports(),
            udp_port: default_udp_port(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            clipboard_poll_interval_ms: default_clipboard_poll_ms(),
            resume_delay_ms: default_resume_delay_ms(),
            discovery_message: default_discovery_message(),
            discovery_response_prefix: default_discovery_response_prefix(),
            max_file_size: default_max_file_size(),
            max_frame_len: default_max_frame_len(),
            temp_folder: default_temp_folder(),
            history_size: default_history_size(),
            default_password: default_password(),
            trusted_devices: Vec::new(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] for invalid TOML, and a validation error for
    /// out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::load`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig = toml::from_str(text)?;
        cfg.validate()
    }

    /// Checks every invariant and returns the config unchanged if it holds.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(self) -> Result<Self, ConfigError> {
        check_port("TCP", self.tcp_port)?;
        check_port("UDP", self.udp_port)?;
        for &port in &self.fallback_ports {
            check_port("fallback TCP", port)?;
        }
        if self.history_size == 0 {
            return Err(ConfigError::Zero("history_size"));
        }
        if self.clipboard_poll_interval_ms == 0 {
            return Err(ConfigError::Zero("clipboard_poll_interval_ms"));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ConfigError::Zero("broadcast_interval_ms"));
        }
        Ok(self)
    }

    /// Returns a copy with a new TCP port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortOutOfRange`] outside `1024..=65535`.
    pub fn with_tcp_port(self, port: u16) -> Result<Self, ConfigError> {
        check_port("TCP", port)?;
        Ok(Self {
            tcp_port: port,
            ..self
        })
    }

    /// Returns a copy with a new UDP discovery port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortOutOfRange`] outside `1024..=65535`.
    pub fn with_udp_port(self, port: u16) -> Result<Self, ConfigError> {
        check_port("UDP", port)?;
        Ok(Self {
            udp_port: port,
            ..self
        })
    }

    /// Returns a copy with a new history capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero capacity.
    pub fn with_history_size(self, size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::Zero("history_size"));
        }
        Ok(Self {
            history_size: size,
            ..self
        })
    }

    /// Returns a copy with `device` added to the trusted list (no duplicates).
    pub fn with_trusted_device(mut self, device: impl Into<String>) -> Self {
        let device = device.into();
        if !self.trusted_devices.contains(&device) {
            self.trusted_devices.push(device);
        }
        self
    }

    /// Returns a copy with `device` removed from the trusted list.
    pub fn without_trusted_device(mut self, device: &str) -> Self {
        self.trusted_devices.retain(|d| d != device);
        self
    }

    /// `true` if the list is empty or contains `device`.
    pub fn is_trusted_device(&self, device: &str) -> bool {
        self.trusted_devices.is_empty() || self.trusted_devices.iter().any(|d| d == device)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn clipboard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_poll_interval_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// `None` when keepalive pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
}

fn check_port(name: &'static str, port: u16) -> Result<(), ConfigError> {
    if port < MIN_PORT {
        return Err(ConfigError::PortOutOfRange { name, port });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_protocol_constants() {
        // Arrange / Act
        let cfg = SyncConfig::default();

        // Assert
        assert_eq!(cfg.tcp_port, 8888);
        assert_eq!(cfg.udp_port, 41234);
        assert_eq!(cfg.fallback_ports, vec![8889, 8890, 8891, 8892, 8893]);
        assert_eq!(cfg.max_file_size, 1_048_576);
        assert_eq!(cfg.history_size, 10);
        assert_eq!(cfg.broadcast_interval(), Duration::from_secs(5));
        assert_eq!(cfg.clipboard_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.resume_delay(), Duration::from_millis(500));
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_with_tcp_port_rejects_privileged_port() {
        let result = SyncConfig::default().with_tcp_port(80);
        assert!(matches!(
            result,
            Err(ConfigError::PortOutOfRange { port: 80, .. })
        ));
    }

    #[test]
    fn test_with_tcp_port_accepts_boundaries() {
        assert_eq!(
            SyncConfig::default().with_tcp_port(1024).unwrap().tcp_port,
            1024
        );
        assert_eq!(
            SyncConfig::default().with_tcp_port(65535).unwrap().tcp_port,
            65535
        );
    }

    #[test]
    fn test_with_udp_port_does_not_touch_tcp_port() {
        // Arrange
        let cfg = SyncConfig::default();

        // Act
        let updated = cfg.clone().with_udp_port(50000).unwrap();

        // Assert
        assert_eq!(updated.udp_port, 50000);
        assert_eq!(updated.tcp_port, cfg.tcp_port);
    }

    #[test]
    fn test_with_history_size_rejects_zero() {
        assert!(matches!(
            SyncConfig::default().with_history_size(0),
            Err(ConfigError::Zero("history_size"))
        ));
    }

    #[test]
    fn test_trusted_devices_empty_list_trusts_everyone() {
        let cfg = SyncConfig::default();
        assert!(cfg.is_trusted_device("10.0.0.7"));
    }

    #[test]
    fn test_trusted_devices_add_and_remove() {
        // Arrange
        let cfg = SyncConfig::default()
            .with_trusted_device("10.0.0.1")
            .with_trusted_device("10.0.0.1");

        // Assert – duplicate not added, others rejected
        assert_eq!(cfg.trusted_devices.len(), 1);
        assert!(cfg.is_trusted_device("10.0.0.1"));
        assert!(!cfg.is_trusted_device("10.0.0.2"));

        // Act
        let cfg = cfg.without_trusted_device("10.0.0.1");

        // Assert – empty list again trusts everyone
        assert!(cfg.is_trusted_device("10.0.0.2"));
    }

    #[test]
    fn test_from_toml_str_fills_missing_fields_with_defaults() {
        // Arrange
        let text = "tcp_port = 9000\nhistory_size = 3\n";

        // Act
        let cfg = SyncConfig::from_toml_str(text).unwrap();

        // Assert
        assert_eq!(cfg.tcp_port, 9000);
        assert_eq!(cfg.history_size, 3);
        assert_eq!(cfg.udp_port, 41234);
        assert_eq!(cfg.discovery_message, "CLIPBOARD_SYNC_DISCOVERY");
    }

    #[test]
    fn test_from_toml_str_validates_ports() {
        let result = SyncConfig::from_toml_str("udp_port = 53\n");
        assert!(matches!(
            result,
            Err(ConfigError::PortOutOfRange { name: "UDP", .. })
        ));
    }

    #[test]
    fn test_from_toml_str_reports_parse_errors() {
        let result = SyncConfig::from_toml_str("tcp_port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_returns_io_error() {
        let result = SyncConfig::load(Path::new("/definitely/not/here/clipsync.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_ping_interval_zero_disables_keepalive() {
        let cfg = SyncConfig {
            ping_interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(cfg.ping_interval(), None);
    }
}
