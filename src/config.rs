//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::kettle::{DEFAULT_IV, DEFAULT_KEY};

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub cipher: CipherConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kettle connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    /// TCP port of the kettle (default: 6002).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Device IMEI echoed in every outgoing envelope.
    #[serde(default)]
    pub imei: String,
    /// Socket I/O timeout in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect attempts before giving up (default: 3).
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Send commands AES encrypted. The kettle also accepts plain commands.
    #[serde(default)]
    pub send_encrypted: bool,
    /// Interval between KeepConnect frames (default: 30).
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Keep warm period requested by `turn_on` when keep warm is enabled.
    #[serde(default = "default_keep_warm_mins")]
    pub keep_warm_mins: u8,
    /// Receive budget per envelope; needs to fit a few back to back messages.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_port() -> u16 {
    6002
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_keep_warm_mins() -> u8 {
    30
}

fn default_max_frame_bytes() -> usize {
    3200
}

/// AES-128-CBC parameters shared with the kettle firmware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherConfig {
    pub key: String,
    pub iv: String,
}

/// UDP discovery probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_beacons_per_round")]
    pub beacons_per_round: u32,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_listen_timeout_secs")]
    pub listen_timeout_secs: u64,
    /// Run a probe after each failed connect attempt to wake the kettle.
    #[serde(default = "default_probe_on_connect_failure")]
    pub probe_on_connect_failure: bool,
}

fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_discovery_port() -> u16 {
    15103
}

fn default_beacons_per_round() -> u32 {
    3
}

fn default_rounds() -> u32 {
    3
}

fn default_listen_timeout_secs() -> u64 {
    5
}

fn default_probe_on_connect_failure() -> bool {
    true
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Get config file path (platform config directory, else working directory).
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "appkettle")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::Validation("Kettle host cannot be empty".to_string()));
        }
        if self.device.port == 0 {
            return Err(ConfigError::Validation("Kettle port must be greater than 0".to_string()));
        }
        if self.device.timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "Socket timeout must be at least 1 second".to_string(),
            ));
        }
        if self.device.connect_attempts < 1 {
            return Err(ConfigError::Validation(
                "Connect attempts must be at least 1".to_string(),
            ));
        }
        if self.device.keep_warm_mins > 30 {
            return Err(ConfigError::Validation(
                "Keep warm cannot exceed 30 minutes".to_string(),
            ));
        }
        if self.device.max_frame_bytes < 32 {
            return Err(ConfigError::Validation(
                "Max frame size must be at least 32 bytes".to_string(),
            ));
        }
        if self.cipher.key.len() != 16 {
            return Err(ConfigError::Validation("Cipher key must be 16 bytes".to_string()));
        }
        if self.cipher.iv.len() != 16 {
            return Err(ConfigError::Validation("Cipher IV must be 16 bytes".to_string()));
        }
        if self.discovery.port == 0 {
            return Err(ConfigError::Validation(
                "Discovery port must be greater than 0".to_string(),
            ));
        }
        if self.discovery.rounds < 1 {
            return Err(ConfigError::Validation(
                "Discovery rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl DeviceConfig {
    /// Socket I/O timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// KeepConnect interval.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// `host:port` of the kettle.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CipherConfig {
    /// Key as a 16-byte block.
    pub fn key_bytes(&self) -> Result<[u8; 16], ConfigError> {
        to_block(&self.key, "key")
    }

    /// IV as a 16-byte block.
    pub fn iv_bytes(&self) -> Result<[u8; 16], ConfigError> {
        to_block(&self.iv, "IV")
    }
}

fn to_block(value: &str, what: &str) -> Result<[u8; 16], ConfigError> {
    value
        .as_bytes()
        .try_into()
        .map_err(|_| ConfigError::Validation(format!("Cipher {what} must be 16 bytes")))
}

impl DiscoveryConfig {
    /// How long each round listens for a reply.
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.50".to_string(),
            port: default_port(),
            imei: String::new(),
            timeout_secs: default_timeout_secs(),
            connect_attempts: default_connect_attempts(),
            send_encrypted: false,
            keep_alive_secs: default_keep_alive_secs(),
            keep_warm_mins: default_keep_warm_mins(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            key: String::from_utf8_lossy(DEFAULT_KEY).into_owned(),
            iv: String::from_utf8_lossy(DEFAULT_IV).into_owned(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: default_broadcast_addr(),
            port: default_discovery_port(),
            beacons_per_round: default_beacons_per_round(),
            rounds: default_rounds(),
            listen_timeout_secs: default_listen_timeout_secs(),
            probe_on_connect_failure: default_probe_on_connect_failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_cipher_is_protocol_constant() {
        let cipher = CipherConfig::default();
        assert_eq!(&cipher.key_bytes().unwrap(), DEFAULT_KEY);
        assert_eq!(&cipher.iv_bytes().unwrap(), DEFAULT_IV);
    }

    #[test]
    fn test_validation_empty_host() {
        let mut config = AppConfig::default();
        config.device.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_short_key() {
        let mut config = AppConfig::default();
        config.cipher.key = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_keep_warm_bounds() {
        let mut config = AppConfig::default();

        config.device.keep_warm_mins = 31;
        assert!(config.validate().is_err());

        config.device.keep_warm_mins = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [device]
            host = "10.0.0.7"
            imei = "GD0-12345-abcd"
            "#,
        )
        .unwrap();

        assert_eq!(config.device.address(), "10.0.0.7:6002");
        assert_eq!(config.device.connect_attempts, 3);
        assert_eq!(config.discovery.port, 15103);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("appkettle-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.device.imei = "GD0-1".to_string();
        config.save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(loaded) => assert_eq!(loaded.device.imei, "GD0-1"),
            other => panic!("expected loaded config, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
