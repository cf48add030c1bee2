//! # Configuration Management
//!
//! Centralized configuration for the realm server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables (`REALM_*`) via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Sections
//! - `server`: listen address, timeouts, outbox depth, population ceiling, worker pool
//! - `admission`: per-host connection limits and the reconnect throttle
//! - `login`: accepted client build, credential block decoding, ban list
//! - `update`: entity delta update limits
//! - `logging`: level, format and outputs

use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{LoginPolicy, RsaKey, DEFAULT_CLIENT_VERSION};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default game port of the legacy client.
pub const DEFAULT_PORT: u16 = 43594;

/// Largest population the 11-bit update slot field can address.
pub const MAX_POPULATION: usize = 2047;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RealmConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub login: LoginConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RealmConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `REALM_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("REALM_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Ok(limit) = std::env::var("REALM_BACKPRESSURE_LIMIT") {
            if let Ok(val) = limit.parse::<usize>() {
                self.server.backpressure_limit = val;
            }
        }

        if let Ok(timeout) = std::env::var("REALM_CONNECTION_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.server.connection_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(players) = std::env::var("REALM_MAX_PLAYERS") {
            if let Ok(val) = players.parse::<usize>() {
                self.server.max_players = val;
            }
        }

        if let Ok(modulus) = std::env::var("REALM_RSA_MODULUS") {
            self.login.rsa_modulus = modulus;
        }

        if let Ok(exponent) = std::env::var("REALM_RSA_EXPONENT") {
            self.login.rsa_exponent = exponent;
            self.login.rsa_enabled = true;
        }

        if let Ok(level) = std::env::var("REALM_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                self.logging.log_level = val;
            }
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.admission.validate());
        errors.extend(self.login.validate());
        errors.extend(self.update.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:43594")
    pub address: String,

    /// Frames an actor's outbox holds before pushes fail
    pub backpressure_limit: usize,

    /// A connection with no inbound traffic for this long is closed
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Population ceiling; logins past it get "world full"
    pub max_players: usize,

    /// Threads that evaluate logins and persist profiles off the I/O path
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            backpressure_limit: 128,
            connection_timeout: timeout::IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_players: 2000,
            worker_threads: 4,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:43594')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        } else if self.max_players > MAX_POPULATION {
            errors.push(format!(
                "Max players too large: {} (maximum: {MAX_POPULATION})",
                self.max_players
            ));
        }

        if self.worker_threads == 0 {
            errors.push("Worker threads must be greater than 0".to_string());
        } else if self.worker_threads > 256 {
            errors.push(format!(
                "Worker threads too many: {} (maximum: 256)",
                self.worker_threads
            ));
        }

        errors
    }
}

/// Per-host admission limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent connections allowed from one host
    pub max_per_host: u32,

    /// Connections allowed while a host is inside its throttle window
    pub per_interval_cap: u32,

    /// Minimum spacing between connections from one host
    #[serde(with = "duration_serde")]
    pub throttle_window: Duration,

    /// Loopback peers bypass every limit
    pub exempt_loopback: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_per_host: 1,
            per_interval_cap: 1,
            throttle_window: Duration::from_millis(1000),
            exempt_loopback: true,
        }
    }
}

impl AdmissionConfig {
    /// Validate admission configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_per_host == 0 {
            errors.push("Max connections per host must be greater than 0".to_string());
        }

        if self.per_interval_cap == 0 {
            errors.push("Per-interval cap must be greater than 0".to_string());
        }

        if self.throttle_window.as_secs() > 60 {
            errors.push("Throttle window too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Login handshake configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Client build accepted in the login block
    pub client_version: u16,

    /// Whether the credential block is RSA ciphertext
    pub rsa_enabled: bool,

    /// RSA modulus, decimal
    pub rsa_modulus: String,

    /// RSA private exponent, decimal
    pub rsa_exponent: String,

    /// Create a profile on first login instead of rejecting unknown names
    pub auto_register: bool,

    /// Hosts refused at login with "account disabled"
    pub banned_hosts: Vec<String>,

    /// Message shown once the setup burst completes
    pub welcome_message: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            client_version: DEFAULT_CLIENT_VERSION,
            rsa_enabled: false,
            rsa_modulus: String::new(),
            rsa_exponent: String::new(),
            auto_register: true,
            banned_hosts: Vec::new(),
            welcome_message: String::from("Welcome."),
        }
    }
}

impl LoginConfig {
    /// Validate login configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.rsa_enabled {
            if let Err(e) = RsaKey::from_decimal(&self.rsa_modulus, &self.rsa_exponent) {
                errors.push(format!("RSA key unusable: {e}"));
            }
        }

        for host in &self.banned_hosts {
            if host.parse::<IpAddr>().is_err() {
                errors.push(format!("Invalid banned host: '{host}'"));
            }
        }

        if self.welcome_message.len() > u8::MAX as usize - 1 {
            errors.push("Welcome message too long (maximum: 254 bytes)".to_string());
        }

        errors
    }

    /// Handshake rules derived from this section
    pub fn policy(&self) -> Result<LoginPolicy> {
        let rsa = if self.rsa_enabled {
            Some(RsaKey::from_decimal(&self.rsa_modulus, &self.rsa_exponent)?)
        } else {
            None
        };
        Ok(LoginPolicy {
            client_version: self.client_version,
            rsa,
        })
    }

    /// Parsed ban list; entries that fail to parse are skipped
    pub fn banned_addresses(&self) -> Vec<IpAddr> {
        self.banned_hosts
            .iter()
            .filter_map(|host| host.parse().ok())
            .collect()
    }
}

/// Entity delta update limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// New entities introduced to one viewer per tick
    pub additions_per_tick: usize,

    /// Entities one viewer tracks at most
    pub max_visible: usize,

    /// Chebyshev distance, in tiles, at which entities are visible
    pub view_distance: i32,

    /// Threads sharing the per-tick encoding work
    pub tick_workers: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            additions_per_tick: 15,
            max_visible: 255,
            view_distance: 15,
            tick_workers: 4,
        }
    }
}

impl UpdateConfig {
    /// Validate update configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.additions_per_tick == 0 {
            errors.push("Additions per tick must be greater than 0".to_string());
        }

        if self.max_visible == 0 || self.max_visible > 255 {
            errors.push(format!(
                "Max visible entities out of range: {} (valid range: 1-255)",
                self.max_visible
            ));
        }

        if !(1..=15).contains(&self.view_distance) {
            errors.push(format!(
                "View distance out of range: {} (valid range: 1-15)",
                self.view_distance
            ));
        }

        if self.tick_workers == 0 {
            errors.push("Tick workers must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realm-server"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
