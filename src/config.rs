/*!
 * Configuration types for the pubsub logger
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LoggerError, Result};

/// Main configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Root directory holding one subdirectory per channel address
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Fixed delay before looking for the transport again, and before
    /// resubscribing after the subscription process exits
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Diagnostic log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Channels to record
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            retry_interval_secs: default_retry_interval(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            transport: TransportConfig::default(),
            resolver: ResolverConfig::default(),
            server: ServerConfig::default(),
            channels: Vec::new(),
        }
    }
}

/// How to find and drive the transport daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Substring identifying the daemon executable in the process table
    #[serde(default = "default_daemon_name")]
    pub daemon_name: String,

    /// Explicit daemon executable. When set, the process table is not scanned.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Processes with a command-line path inside this directory are ignored.
    /// Defaults to the directory holding this binary.
    #[serde(default)]
    pub exclude_dir: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            daemon_name: default_daemon_name(),
            executable: None,
            exclude_dir: None,
        }
    }
}

/// Name resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Text record key holding the channel identifier
    #[serde(default = "default_record_key")]
    pub record_key: String,

    /// Static domain -> channel identifier table, consulted first
    #[serde(default)]
    pub records: BTreeMap<String, String>,

    /// Read ENS text records for `.eth` domains missing from `records`
    #[serde(default = "default_true")]
    pub ens: bool,

    /// Ethereum JSON-RPC endpoint used for ENS lookups
    #[serde(default = "default_ens_rpc_url")]
    pub ens_rpc_url: String,

    /// Fall back to DNS TXT lookups for other domains missing from `records`
    #[serde(default = "default_true")]
    pub dns: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            record_key: default_record_key(),
            records: BTreeMap::new(),
            ens: true,
            ens_rpc_url: default_ens_rpc_url(),
            dns: true,
        }
    }
}

/// Log browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One channel to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Human-readable label, for diagnostics only
    #[serde(default, alias = "title", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Channel identifier, or a domain-style name to resolve
    pub address: String,
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            display_name: None,
            address: address.into(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Domain-style addresses (`name.eth`) need a text record lookup;
    /// peer identifiers never contain a dot.
    pub fn is_domain(&self) -> bool {
        self.address.contains('.')
    }

    /// Display name if present, address otherwise
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.address)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_retry_interval() -> u64 {
    60
}

fn default_daemon_name() -> String {
    "ipfs".to_string()
}

fn default_record_key() -> String {
    "subplebbit-address".to_string()
}

fn default_ens_rpc_url() -> String {
    "https://ethereum-rpc.publicnode.com".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    39393
}

impl LoggerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| LoggerError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Reject configurations that would misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval_secs == 0 {
            return Err(LoggerError::Config(
                "retry_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.resolver.ens && self.resolver.ens_rpc_url.trim().is_empty() {
            return Err(LoggerError::Config(
                "resolver.ens_rpc_url must be set when resolver.ens is enabled".to_string(),
            ));
        }

        if self.transport.daemon_name.trim().is_empty() {
            return Err(LoggerError::Config(
                "transport.daemon_name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            let address = channel.address.as_str();
            if address.trim().is_empty() {
                return Err(LoggerError::Config(
                    "channel address must not be empty".to_string(),
                ));
            }
            // The address becomes a directory name under log_dir
            if address.contains('/') || address.contains('\\') || address.contains("..") {
                return Err(LoggerError::Config(format!(
                    "channel address '{}' must not contain path separators or '..'",
                    address
                )));
            }
            if !seen.insert(address) {
                return Err(LoggerError::Config(format!(
                    "channel address '{}' is listed twice",
                    address
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retry_interval(), Duration::from_secs(60));
        assert_eq!(config.server.port, 39393);
        assert_eq!(config.transport.daemon_name, "ipfs");
        assert_eq!(config.resolver.record_key, "subplebbit-address");
        assert!(config.channels.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = LoggerConfig::from_toml("").unwrap();
        assert_eq!(config.retry_interval_secs, 60);
        assert!(config.server.enabled);
        assert!(config.resolver.dns);
        assert!(config.resolver.ens);
        assert_eq!(config.resolver.ens_rpc_url, "https://ethereum-rpc.publicnode.com");
    }

    #[test]
    fn test_ens_requires_rpc_url() {
        let config = LoggerConfig::from_toml("[resolver]\nens_rpc_url = \"\"\n").unwrap();
        assert!(config.validate().is_err());

        let config =
            LoggerConfig::from_toml("[resolver]\nens = false\nens_rpc_url = \"\"\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_config_example() {
        let toml_str = r#"
log_dir = "/var/log/pubsub"
retry_interval_secs = 5
log_level = "debug"

[transport]
daemon_name = "kubo"

[resolver]
dns = false
records = { "plebtoken.eth" = "12D3KooWPlebToken" }

[server]
port = 8080

[[channels]]
title = "Test sub"
address = "12D3KooWG3XbzoVyAE6Y9vHZKF64Yuuu4TjdgQKedk14iYmTEPWu"

[[channels]]
address = "plebtoken.eth"
"#;

        let config = LoggerConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/pubsub"));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.transport.daemon_name, "kubo");
        assert!(!config.resolver.dns);
        assert_eq!(
            config.resolver.records.get("plebtoken.eth").map(String::as_str),
            Some("12D3KooWPlebToken")
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].display_name.as_deref(), Some("Test sub"));
        assert!(!config.channels[0].is_domain());
        assert!(config.channels[1].is_domain());
        assert_eq!(config.channels[1].label(), "plebtoken.eth");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_requires_address() {
        let result = LoggerConfig::from_toml("[[channels]]\ntitle = \"x\"\n");
        assert!(matches!(result, Err(LoggerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_channels() {
        let mut config = LoggerConfig::default();
        config.channels = vec![ChannelConfig::new("../etc")];
        assert!(config.validate().is_err());

        config.channels = vec![ChannelConfig::new("a/b")];
        assert!(config.validate().is_err());

        config.channels = vec![ChannelConfig::new("  ")];
        assert!(config.validate().is_err());

        config.channels = vec![ChannelConfig::new("dup.eth"), ChannelConfig::new("dup.eth")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = LoggerConfig {
            retry_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
