//! Configuration system for the Lodestar CLI.

use lodestar_signaling::{ClosePolicy, SignalingConfig};
use lodestar_stun::{Ipv6XorMode, ResponderConfig};
use lodestar_transport::MuxConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lodestar configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// STUN responder configuration
    #[serde(default)]
    pub stun: StunConfig,
    /// Signaling relay configuration
    #[serde(default)]
    pub signaling: SignalingSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// STUN responder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StunConfig {
    /// Run the STUN responder
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// UDP listen address
    #[serde(default = "default_stun_listen_addr")]
    pub listen_addr: String,
    /// Seconds without traffic before a client's state is dropped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Datagrams buffered per client before dropping
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// IPv6 XOR-MAPPED-ADDRESS transform
    #[serde(default)]
    pub ipv6_xor_mode: Ipv6XorMode,
    /// Binding requests per second per IP (unlimited when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<usize>,
}

/// Signaling relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalingSection {
    /// Run the signaling relay
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TCP listen address
    #[serde(default = "default_signaling_listen_addr")]
    pub listen_addr: String,
    /// WebSocket endpoint path
    #[serde(default = "default_signaling_path")]
    pub path: String,
    /// Frames buffered per peer before it is disconnected
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Effect of a `close` message on the sender's socket
    #[serde(default)]
    pub close_policy: ClosePolicy,
    /// Seconds allowed for the WebSocket upgrade
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or `tracing` filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_true() -> bool {
    true
}

fn default_stun_listen_addr() -> String {
    "0.0.0.0:3478".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_signaling_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_signaling_path() -> String {
    "/ws/signaling".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    32
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_stun_listen_addr(),
            idle_timeout_secs: default_idle_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            ipv6_xor_mode: Ipv6XorMode::default(),
            rate_limit: None,
        }
    }
}

impl Default for SignalingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_signaling_listen_addr(),
            path: default_signaling_path(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            close_policy: ClosePolicy::default(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("lodestar/config.toml")
    }

    /// Load `path`, or the default path if none is given.
    ///
    /// A missing file at the default path yields the built-in defaults; a
    /// missing file at an explicit path is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or parsing fails.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse STUN listen address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn stun_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.stun
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid STUN listen address '{}': {}", self.stun.listen_addr, e))
    }

    /// Parse signaling listen address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn signaling_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.signaling.listen_addr.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid signaling listen address '{}': {}",
                self.signaling.listen_addr,
                e
            )
        })
    }

    /// UDP multiplexer settings
    #[must_use]
    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            idle_timeout: Duration::from_secs(self.stun.idle_timeout_secs),
            queue_capacity: self.stun.queue_capacity,
            ..MuxConfig::default()
        }
    }

    /// STUN responder settings
    #[must_use]
    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig {
            ipv6_xor_mode: self.stun.ipv6_xor_mode,
            rate_limit: self.stun.rate_limit,
        }
    }

    /// Signaling service settings
    #[must_use]
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            path: self.signaling.path.clone(),
            outbound_queue_capacity: self.signaling.outbound_queue_capacity,
            close_policy: self.signaling.close_policy,
            handshake_timeout: Duration::from_secs(self.signaling.handshake_timeout_secs),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.stun.enabled && !self.signaling.enabled {
            anyhow::bail!("Both STUN and signaling are disabled; nothing to run");
        }

        self.stun_listen_addr()?;
        if self.stun.idle_timeout_secs == 0 {
            anyhow::bail!("STUN idle timeout must be at least 1 second");
        }
        if self.stun.queue_capacity == 0 || self.stun.queue_capacity > 65_536 {
            anyhow::bail!("STUN queue capacity must be between 1 and 65536");
        }
        if self.stun.rate_limit == Some(0) {
            anyhow::bail!("STUN rate limit must be at least 1 request per second");
        }

        self.signaling_listen_addr()?;
        if !self.signaling.path.starts_with('/') {
            anyhow::bail!(
                "Signaling path must start with '/': {}",
                self.signaling.path
            );
        }
        if self.signaling.outbound_queue_capacity == 0 {
            anyhow::bail!("Signaling outbound queue capacity must be at least 1");
        }
        if self.signaling.handshake_timeout_secs == 0 {
            anyhow::bail!("Signaling handshake timeout must be at least 1 second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
