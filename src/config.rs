//! Configuration management
//!
//! Handles loading and validating relay configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the TCP listener (port 0 = ephemeral)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

/// Discovery beacon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Advertise the relay on the local segment
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Service name advertised in beacons
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Service type tag advertised in beacons
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// UDP port the multicast beacon is sent to
    #[serde(default = "default_beacon_port")]
    pub port: u16,
    /// Seconds between beacons
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_secs: u64,
}

/// Transport tuning
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// TCP keepalive idle time in seconds
    #[serde(default = "default_keepalive_idle")]
    pub keepalive_idle_secs: u64,
    /// TCP keepalive probe interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Maximum concurrent peer connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound queue depth per connection; overflow fails the connection
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,
    /// Maximum accepted frame payload in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_addr() -> SocketAddr { "0.0.0.0:7001".parse().unwrap() }
fn default_true() -> bool { true }
fn default_service_name() -> String { "server".to_string() }
fn default_service_type() -> String { "_qz._tcp".to_string() }
fn default_beacon_port() -> u16 { 53530 }
fn default_beacon_interval() -> u64 { 4 }
fn default_keepalive_idle() -> u64 { 2 }
fn default_keepalive_interval() -> u64 { 2 }
fn default_max_connections() -> usize { 64 }
fn default_send_queue_depth() -> usize { 256 }
fn default_max_frame_len() -> usize { 64 * 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: default_service_name(),
            service_type: default_service_type(),
            port: default_beacon_port(),
            beacon_interval_secs: default_beacon_interval(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive_idle_secs: default_keepalive_idle(),
            keepalive_interval_secs: default_keepalive_interval(),
            max_connections: default_max_connections(),
            send_queue_depth: default_send_queue_depth(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Keepalive idle time as a `Duration`
    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }

    /// Keepalive probe interval as a `Duration`
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl DiscoveryConfig {
    /// Interval between beacons as a `Duration`
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_secs(self.beacon_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.transport.max_connections == 0 {
            anyhow::bail!("max_connections must be > 0");
        }
        if self.transport.send_queue_depth == 0 {
            anyhow::bail!("send_queue_depth must be > 0");
        }
        if self.transport.max_frame_len == 0 {
            anyhow::bail!("max_frame_len must be > 0");
        }
        if self.transport.keepalive_idle_secs == 0 {
            anyhow::bail!("keepalive_idle_secs must be > 0");
        }
        if self.discovery.beacon_interval_secs == 0 {
            anyhow::bail!("beacon_interval_secs must be > 0");
        }
        if self.discovery.service_name.is_empty() {
            anyhow::bail!("service_name must not be empty");
        }
        Ok(())
    }
}
