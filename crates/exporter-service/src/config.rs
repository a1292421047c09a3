//! Exporter configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default, so an empty environment produces a working configuration for a
//! node installed under the default root.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default port for the `/metrics` and health HTTP server.
pub const DEFAULT_METRICS_PORT: u16 = 9914;

/// Default metric namespace and daemon service prefix.
pub const DEFAULT_NETWORK_PREFIX: &str = "stai";

/// Default daemon websocket host.
pub const DEFAULT_DAEMON_HOST: &str = "localhost";

/// Default daemon websocket port.
pub const DEFAULT_DAEMON_PORT: u16 = 55400;

/// Default crawler HTTP RPC port.
pub const DEFAULT_CRAWLER_RPC_PORT: u16 = 8561;

/// Default harvester HTTP RPC port.
pub const DEFAULT_HARVESTER_RPC_PORT: u16 = 8560;

/// Default timeout for secondary (HTTP RPC) requests in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default delay between daemon reconnect attempts in seconds.
pub const DEFAULT_RECONNECT_INTERVAL_SECONDS: u64 = 5;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Exporter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the metrics HTTP server (default: 9914).
    pub metrics_port: u16,

    /// Optional MaxMind country database. Unset disables country mapping.
    pub maxmind_db_path: Option<PathBuf>,

    /// Log level directive used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Metric namespace and daemon service prefix (e.g. "stai").
    pub network_prefix: String,

    /// Node root directory; TLS material lives under `config/ssl/`.
    pub root_path: PathBuf,

    /// Daemon websocket host.
    pub daemon_host: String,

    /// Daemon websocket port.
    pub daemon_port: u16,

    /// Crawler HTTP RPC port.
    pub crawler_rpc_port: u16,

    /// Harvester HTTP RPC port.
    pub harvester_rpc_port: u16,

    /// Timeout applied to every secondary request.
    pub request_timeout: Duration,

    /// Delay between daemon reconnect attempts.
    pub reconnect_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let metrics_port = parse_or(vars, "EXPORTER_METRICS_PORT", DEFAULT_METRICS_PORT)?;

        let maxmind_db_path = vars
            .get("EXPORTER_MAXMIND_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let log_level = vars
            .get("EXPORTER_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let log_format = match vars.get("EXPORTER_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "EXPORTER_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let network_prefix = vars
            .get("EXPORTER_NETWORK_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_NETWORK_PREFIX.to_string());
        if network_prefix.is_empty()
            || !network_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue(format!(
                "EXPORTER_NETWORK_PREFIX must be a non-empty identifier, got '{network_prefix}'"
            )));
        }

        let root_path = vars
            .get("EXPORTER_ROOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = vars
                    .get("HOME")
                    .cloned()
                    .unwrap_or_else(|| ".".to_string());
                PathBuf::from(home)
                    .join(format!(".{network_prefix}"))
                    .join("mainnet")
            });

        let daemon_host = vars
            .get("EXPORTER_DAEMON_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DAEMON_HOST.to_string());

        let daemon_port = parse_or(vars, "EXPORTER_DAEMON_PORT", DEFAULT_DAEMON_PORT)?;
        let crawler_rpc_port =
            parse_or(vars, "EXPORTER_CRAWLER_RPC_PORT", DEFAULT_CRAWLER_RPC_PORT)?;
        let harvester_rpc_port =
            parse_or(vars, "EXPORTER_HARVESTER_RPC_PORT", DEFAULT_HARVESTER_RPC_PORT)?;

        let request_timeout_seconds = parse_or(
            vars,
            "EXPORTER_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;
        if request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "EXPORTER_REQUEST_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let reconnect_interval_seconds = parse_or(
            vars,
            "EXPORTER_RECONNECT_INTERVAL_SECONDS",
            DEFAULT_RECONNECT_INTERVAL_SECONDS,
        )?;

        Ok(Config {
            metrics_port,
            maxmind_db_path,
            log_level,
            log_format,
            network_prefix,
            root_path,
            daemon_host,
            daemon_port,
            crawler_rpc_port,
            harvester_rpc_port,
            request_timeout: Duration::from_secs(request_timeout_seconds),
            reconnect_interval: Duration::from_secs(reconnect_interval_seconds),
        })
    }

    /// Directory holding the TLS material for one node service.
    #[must_use]
    pub fn ssl_dir(&self, service: &str) -> PathBuf {
        self.root_path.join("config").join("ssl").join(service)
    }

    /// Daemon websocket URL.
    #[must_use]
    pub fn daemon_url(&self) -> String {
        format!("wss://{}:{}", self.daemon_host, self.daemon_port)
    }
}

/// Parse a numeric variable, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}='{raw}'"))),
    }
}
