//! Configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_PENDING_CALLBACKS: usize = 1024;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);
// One queued text frame plus the slot kept free for a close request.
const MIN_OUTBOUND_CAPACITY: usize = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid WSIO_PATH '{0}' (must start with '/')")]
    InvalidPath(String),
}

/// Per-connection protocol tuning shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// How long a sent callback may wait for its reply.
    pub callback_timeout: Duration,
    /// Upper bound on unresolved callbacks per connection.
    pub max_pending_callbacks: usize,
    /// How often transport drivers evict timed-out callbacks.
    pub sweep_interval: Duration,
    /// Frames a connection may queue for its transport driver before
    /// further emits are dropped.
    pub outbound_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_millis(DEFAULT_CALLBACK_TIMEOUT_MS),
            max_pending_callbacks: DEFAULT_MAX_PENDING_CALLBACKS,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ProtocolConfig {
    /// Sweep period for the driver's timer, never zero.
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        self.sweep_interval.max(MIN_SWEEP_INTERVAL)
    }

    /// Outbound queue size, always large enough to hold a close request
    /// behind a text frame.
    #[must_use]
    pub fn outbound_queue_capacity(&self) -> usize {
        self.outbound_capacity.max(MIN_OUTBOUND_CAPACITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub protocol: ProtocolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            ws_path: DEFAULT_WS_PATH.to_owned(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build server config from environment variables.
    ///
    /// Optional:
    /// - `WSIO_HOST`: default `0.0.0.0`
    /// - `PORT`: default 3000
    /// - `WSIO_PATH`: default `/ws`
    /// - `WSIO_CALLBACK_TIMEOUT_MS`: default 30000
    /// - `WSIO_MAX_PENDING_CALLBACKS`: default 1024
    /// - `WSIO_SWEEP_INTERVAL_MS`: default 1000
    /// - `WSIO_OUTBOUND_CAPACITY`: default 256
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `PORT` is not a port number or `WSIO_PATH`
    /// is not an absolute path.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build server config from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("WSIO_HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = parse_port(lookup("PORT").as_deref())?;
        let ws_path = parse_path(lookup("WSIO_PATH").as_deref())?;
        let protocol = ProtocolConfig {
            callback_timeout: Duration::from_millis(parse_or(
                lookup("WSIO_CALLBACK_TIMEOUT_MS").as_deref(),
                DEFAULT_CALLBACK_TIMEOUT_MS,
            )),
            max_pending_callbacks: parse_or(
                lookup("WSIO_MAX_PENDING_CALLBACKS").as_deref(),
                DEFAULT_MAX_PENDING_CALLBACKS,
            ),
            sweep_interval: Duration::from_millis(
                parse_or(lookup("WSIO_SWEEP_INTERVAL_MS").as_deref(), DEFAULT_SWEEP_INTERVAL_MS).max(1),
            ),
            outbound_capacity: parse_or(
                lookup("WSIO_OUTBOUND_CAPACITY").as_deref(),
                DEFAULT_OUTBOUND_CAPACITY,
            )
            .max(MIN_OUTBOUND_CAPACITY),
        };

        Ok(Self { host, port, ws_path, protocol })
    }

    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

fn parse_port(raw: Option<&str>) -> Result<u16, ConfigError> {
    match raw {
        None => Ok(DEFAULT_PORT),
        Some(v) => v
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(v.to_owned())),
    }
}

fn parse_path(raw: Option<&str>) -> Result<String, ConfigError> {
    let path = raw.unwrap_or(DEFAULT_WS_PATH).trim();
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidPath(path.to_owned()));
    }
    Ok(path.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
