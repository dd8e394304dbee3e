//! # Configuration Management
//!
//! Centralized configuration for room sessions.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`MESH_ROOM_*`)
//!
//! Durations are written as integer milliseconds.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Official bootstrap peers, always part of the daemon's peer list.
pub const OFFICIAL_PEERS: [&str; 2] = [
    "tcp://public.easytier.cn:11010",
    "tcp://public2.easytier.cn:54321",
];

/// Public node directory queried for extra bootstrap peers.
pub const DISCOVERY_API_URL: &str =
    "https://uptime.easytier.cn/api/nodes?page=1&per_page=10000&is_active=true";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    /// Session protocol timing
    #[serde(default)]
    pub client: ClientConfig,

    /// Mesh daemon layout and launch options
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Bootstrap peer discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
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

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MESH_ROOM_MESH_DIR") {
            config.mesh.directory = PathBuf::from(dir);
        }

        if let Ok(timeout) = std::env::var("MESH_ROOM_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.request_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(heartbeat) = std::env::var("MESH_ROOM_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = heartbeat.parse::<u64>() {
                config.client.heartbeat_interval = Duration::from_millis(val);
            }
        }

        if let Ok(url) = std::env::var("MESH_ROOM_DISCOVERY_URL") {
            config.discovery.api_url = url;
        }

        if let Ok(ipv4) = std::env::var("MESH_ROOM_IPV4") {
            let addr = ipv4.parse::<Ipv4Addr>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid MESH_ROOM_IPV4 '{ipv4}': {e}"))
            })?;
            config.mesh.ipv4 = Some(addr);
            config.mesh.dhcp = false;
        }

        Ok(config)
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
        errors.extend(self.client.validate());
        errors.extend(self.mesh.validate());
        errors.extend(self.discovery.validate());
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

/// Session protocol timing and negotiation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a request waits for its response
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Timeout for the TCP connect through the tunnel
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Interval between keep-alives
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Consecutive keep-alive timeouts before the connection is declared lost
    pub max_heartbeat_failures: u32,

    /// Number of peer-list polls while looking for the host
    pub discovery_attempts: u32,

    /// Delay between peer-list polls
    #[serde(with = "duration_serde")]
    pub discovery_interval: Duration,

    /// Request types offered on top of the standard set
    pub extra_request_types: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: timeout::REQUEST_TIMEOUT,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            max_heartbeat_failures: 3,
            discovery_attempts: 10,
            discovery_interval: Duration::from_secs(1),
            extra_request_types: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        } else if self.request_timeout.as_secs() > 300 {
            errors.push("Request timeout too long (maximum: 300s)".to_string());
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 10 {
            errors.push("Heartbeat interval too short (minimum: 10ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.max_heartbeat_failures == 0 {
            errors.push("Max heartbeat failures must be greater than 0".to_string());
        }

        if self.discovery_attempts == 0 {
            errors.push("Discovery attempts must be greater than 0".to_string());
        }

        for t in &self.extra_request_types {
            if t.is_empty() || t.len() > 255 {
                errors.push(format!("Invalid extra request type: '{t}' (1-255 bytes)"));
            }
        }

        errors
    }
}

/// Mesh daemon files and launch toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Directory holding the daemon and its CLI
    pub directory: PathBuf,

    /// Daemon executable name
    pub core_name: String,

    /// Control CLI executable name
    pub cli_name: String,

    /// Packet capture library the daemon needs on Windows
    pub packet_library_name: Option<String>,

    /// Let the mesh assign a virtual address
    pub dhcp: bool,

    /// Static virtual address; takes precedence over `dhcp`
    pub ipv4: Option<Ipv4Addr>,

    pub enable_ipv6: bool,

    pub latency_first: bool,

    /// Try port prediction to get through symmetric NATs
    pub try_punch_sym: bool,

    pub disable_p2p: bool,

    /// Relay traffic for other networks; when off only the room's own
    /// network is forwarded
    pub relay_for_others: bool,

    /// Transport the daemon prefers for new connections
    pub default_protocol: String,

    /// Relay servers added before the bootstrap list
    pub relay_servers: Vec<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        let (core_name, cli_name, packet_library_name) = if cfg!(windows) {
            ("easytier-core.exe", "easytier-cli.exe", Some("Packet.dll".to_string()))
        } else {
            ("easytier-core", "easytier-cli", None)
        };

        Self {
            directory: default_mesh_directory(),
            core_name: core_name.to_string(),
            cli_name: cli_name.to_string(),
            packet_library_name,
            dhcp: true,
            ipv4: None,
            enable_ipv6: true,
            latency_first: true,
            try_punch_sym: true,
            disable_p2p: false,
            relay_for_others: true,
            default_protocol: String::from("tcp"),
            relay_servers: Vec::new(),
        }
    }
}

fn default_mesh_directory() -> PathBuf {
    if cfg!(windows) {
        std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
            .join("easytier")
    } else {
        PathBuf::from("/usr/share/easytier")
    }
}

impl MeshConfig {
    /// Validate mesh configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.core_name.is_empty() || self.cli_name.is_empty() {
            errors.push("Mesh executable names cannot be empty".to_string());
        }

        if !self.dhcp && self.ipv4.is_none() {
            errors.push("Static addressing requires an IPv4 address (or enable dhcp)".to_string());
        }

        if !matches!(
            self.default_protocol.as_str(),
            "tcp" | "udp" | "ws" | "wss" | "quic" | "wg"
        ) {
            errors.push(format!(
                "Unknown default protocol: '{}'",
                self.default_protocol
            ));
        }

        for relay in &self.relay_servers {
            if !relay.contains("://") {
                errors.push(format!(
                    "Relay server must be a URL like 'tcp://host:port': '{relay}'"
                ));
            }
        }

        errors
    }
}

/// Bootstrap peer discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Node directory endpoint
    pub api_url: String,

    /// Timeout for the directory request
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Peers used whether or not the directory answers
    pub official_peers: Vec<String>,

    /// Random directory entries added to the official peers
    pub sample_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_url: DISCOVERY_API_URL.to_string(),
            timeout: timeout::DISCOVERY_TIMEOUT,
            official_peers: OFFICIAL_PEERS.iter().map(|s| s.to_string()).collect(),
            sample_size: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(self.api_url.starts_with("https://") || self.api_url.starts_with("http://")) {
            errors.push(format!("Discovery URL must be http(s): '{}'", self.api_url));
        }

        if self.timeout.as_millis() < 100 {
            errors.push("Discovery timeout too short (minimum: 100ms)".to_string());
        }

        if self.official_peers.is_empty() {
            errors.push("At least one official bootstrap peer is required".to_string());
        }

        if self.sample_size > 64 {
            errors.push(format!(
                "Discovery sample size too large: {} (maximum: 64)",
                self.sample_size
            ));
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

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mesh-room"),
            log_level: Level::INFO,
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
