//! Configuration management for twistwatch.
//!
//! This module provides structured configuration options that can be loaded
//! from environment variables or command-line arguments. It centralizes
//! server binding, database location, scanner invocation, risk thresholds,
//! and message-queue settings.

use std::time::Duration;

use crate::cli::Cli;

/// Main configuration structure for twistwatch.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// External scanner invocation settings
    pub scanner: ScannerConfig,

    /// Risk classification thresholds
    pub risk: RiskConfig,

    /// Root-domain metadata probe settings
    pub probe: ProbeConfig,

    /// Message-queue pass-through settings
    pub queue: QueueConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,

    /// Listen port
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    pub url: String,

    /// Maximum pool connections
    pub max_connections: u32,
}

/// External scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Scanner binary name or path
    pub binary: String,

    /// Fuzzy-hash algorithm passed to --lsh
    pub lsh_algorithm: String,

    /// Whether to request perceptual hashing of rendered pages
    pub use_phash: bool,

    /// Whether to restrict output to registered permutations
    pub registered_only: bool,

    /// Subprocess timeout
    pub timeout: Duration,
}

/// Risk classification thresholds (similarity is 0-100)
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Scores at or above this are high risk and recorded as phishing matches
    pub high_threshold: f64,

    /// Scores at or above this (but below high) are medium risk
    pub medium_threshold: f64,
}

/// Root-domain metadata probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Whether to probe root domains on registration
    pub enabled: bool,

    /// Timeout for DNS lookups
    pub dns_timeout: Duration,

    /// Timeout for the HTTP banner request
    pub http_timeout: Duration,
}

/// Message-queue pass-through configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pub/Sub emulator host, e.g. "localhost:8085". None disables the queue.
    pub emulator_host: Option<String>,

    /// Project id used in topic/subscription paths
    pub project: String,

    /// Topic name for published messages
    pub topic: String,

    /// Subscription the background pull loop drains
    pub subscription: String,

    /// Delay between pull attempts
    pub pull_interval: Duration,

    /// Whether to run the in-process subscriber loop
    pub run_subscriber: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:twistwatch.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: "dnstwist".to_string(),
            lsh_algorithm: "tlsh".to_string(),
            use_phash: true,
            registered_only: true,
            timeout: Duration::from_secs(300),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_threshold: 80.0,
            medium_threshold: 60.0,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dns_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            emulator_host: None,
            project: "twistwatch".to_string(),
            topic: "frontend-to-backend".to_string(),
            subscription: "backend-sub".to_string(),
            pull_interval: Duration::from_secs(5),
            run_subscriber: true,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("TWISTWATCH_BIND") {
            config.server.bind = bind;
        }

        if let Ok(port) = std::env::var("TWISTWATCH_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                config.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("TWISTWATCH_DATABASE_URL") {
            config.database.url = url;
        }

        if let Ok(max) = std::env::var("TWISTWATCH_DB_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse::<u32>() {
                config.database.max_connections = m;
            }
        }

        if let Ok(bin) = std::env::var("TWISTWATCH_SCANNER_BIN") {
            config.scanner.binary = bin;
        }

        if let Ok(lsh) = std::env::var("TWISTWATCH_SCANNER_LSH") {
            config.scanner.lsh_algorithm = lsh;
        }

        if let Ok(timeout) = std::env::var("TWISTWATCH_SCANNER_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                config.scanner.timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(phash) = std::env::var("TWISTWATCH_SCANNER_PHASH") {
            config.scanner.use_phash = truthy(&phash);
        }

        if let Ok(high) = std::env::var("TWISTWATCH_RISK_HIGH") {
            if let Ok(h) = high.parse::<f64>() {
                config.risk.high_threshold = h;
            }
        }

        if let Ok(medium) = std::env::var("TWISTWATCH_RISK_MEDIUM") {
            if let Ok(m) = medium.parse::<f64>() {
                config.risk.medium_threshold = m;
            }
        }

        if let Ok(enabled) = std::env::var("TWISTWATCH_PROBE_ENABLED") {
            config.probe.enabled = truthy(&enabled);
        }

        // The standard emulator variable is honored alongside our own.
        if let Ok(host) = std::env::var("PUBSUB_EMULATOR_HOST") {
            config.queue.emulator_host = Some(host);
        }
        if let Ok(host) = std::env::var("TWISTWATCH_PUBSUB_EMULATOR") {
            config.queue.emulator_host = Some(host);
        }

        if let Ok(project) = std::env::var("TWISTWATCH_PUBSUB_PROJECT") {
            config.queue.project = project;
        }

        if let Ok(topic) = std::env::var("TWISTWATCH_PUBSUB_TOPIC") {
            config.queue.topic = topic;
        }

        if let Ok(sub) = std::env::var("TWISTWATCH_PUBSUB_SUBSCRIPTION") {
            config.queue.subscription = sub;
        }

        config
    }

    /// Merge with CLI arguments, giving CLI precedence
    pub fn merge_with_cli(&mut self, cli: &Cli) {
        if let Some(ref bind) = cli.bind {
            self.server.bind = bind.clone();
        }

        if let Some(port) = cli.port {
            self.server.port = port;
        }

        if let Some(ref url) = cli.database_url {
            self.database.url = url.clone();
        }

        if let Some(ref bin) = cli.scanner_bin {
            self.scanner.binary = bin.clone();
        }

        if let Some(ref host) = cli.pubsub_emulator {
            self.queue.emulator_host = Some(host.clone());
        }

        if cli.no_probe {
            self.probe.enabled = false;
        }

        if cli.no_subscriber {
            self.queue.run_subscriber = false;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database.url".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.max_connections".to_string(),
                value: "0".to_string(),
                reason: "Pool must allow at least 1 connection".to_string(),
            });
        }

        if self.scanner.binary.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "scanner.binary".to_string(),
            });
        }

        if self.scanner.timeout.as_secs() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanner.timeout".to_string(),
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.risk.high_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "risk.high_threshold".to_string(),
                value: self.risk.high_threshold.to_string(),
                reason: "Similarity thresholds are percentages (0-100)".to_string(),
            });
        }

        if self.risk.medium_threshold > self.risk.high_threshold {
            return Err(ConfigError::InvalidValue {
                field: "risk.medium_threshold".to_string(),
                value: self.risk.medium_threshold.to_string(),
                reason: "Medium threshold cannot exceed the high threshold".to_string(),
            });
        }

        if let Some(ref host) = self.queue.emulator_host {
            if host.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "queue.emulator_host".to_string(),
                    value: "<empty>".to_string(),
                    reason: "Emulator host must be host:port".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Socket address string the server should bind to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("1")
        || value.eq_ignore_ascii_case("yes")
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Missing required configuration
    MissingRequired { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value '{}' for '{}': {}", value, field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required configuration field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.scanner.binary, "dnstwist");
        assert_eq!(config.scanner.lsh_algorithm, "tlsh");
        assert_eq!(config.risk.high_threshold, 80.0);
        assert!(config.queue.emulator_host.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.scanner.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.scanner.timeout = Duration::from_secs(300);
        config.risk.medium_threshold = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_loading() {
        env::set_var("TWISTWATCH_PORT", "9100");
        env::set_var("TWISTWATCH_SCANNER_BIN", "/opt/dnstwist/bin/dnstwist");
        env::set_var("TWISTWATCH_RISK_HIGH", "85");

        let config = Config::from_env();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.scanner.binary, "/opt/dnstwist/bin/dnstwist");
        assert_eq!(config.risk.high_threshold, 85.0);

        // Clean up
        env::remove_var("TWISTWATCH_PORT");
        env::remove_var("TWISTWATCH_SCANNER_BIN");
        env::remove_var("TWISTWATCH_RISK_HIGH");
    }

    #[test]
    fn test_listen_addr() {
        let mut config = Config::default();
        config.server.bind = "127.0.0.1".to_string();
        config.server.port = 10001;
        assert_eq!(config.listen_addr(), "127.0.0.1:10001");
    }
}
