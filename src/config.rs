//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::RelayError;

/// Default listen address when neither `LISTEN_ADDR` nor `PORT` is set.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";

/// Default liveness monitor period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default maximum size of a published event body.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP/WebSocket server to.
    pub listen_addr: SocketAddr,

    /// Period of both liveness sweeps.
    pub heartbeat_interval: Duration,

    /// Entries without inbound activity for longer than this are evicted.
    pub idle_timeout: Duration,

    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,

    /// Maximum accepted size of a `POST /update` body, in bytes.
    pub max_event_bytes: usize,

    /// Tracing output format.
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `LISTEN_ADDR` (or `PORT`) is set
    /// but cannot be parsed.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();

        let listen_addr = match (std::env::var("LISTEN_ADDR"), std::env::var("PORT")) {
            (Ok(addr), _) => addr
                .parse()
                .map_err(|e| RelayError::Config(format!("LISTEN_ADDR {addr:?}: {e}")))?,
            (Err(_), Ok(port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|e| RelayError::Config(format!("PORT {port:?}: {e}")))?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            (Err(_), Err(_)) => default_listen_addr(),
        };

        let heartbeat_interval = Duration::from_millis(parse_env(
            "HEARTBEAT_INTERVAL_MS",
            duration_millis(DEFAULT_HEARTBEAT_INTERVAL),
        ))
        .max(Duration::from_millis(1));
        let idle_timeout = Duration::from_millis(parse_env(
            "IDLE_TIMEOUT_MS",
            duration_millis(heartbeat_interval.saturating_mul(2)),
        ));

        let outbound_queue_capacity =
            parse_env("OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_QUEUE_CAPACITY).max(1);
        let max_event_bytes = parse_env("MAX_EVENT_BYTES", DEFAULT_MAX_EVENT_BYTES);

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            heartbeat_interval,
            idle_timeout,
            outbound_queue_capacity,
            max_event_bytes,
            log_format,
        })
    }

    /// Returns a copy with the heartbeat period replaced and the idle
    /// timeout reset to two periods.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.idle_timeout = interval.saturating_mul(2);
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_HEARTBEAT_INTERVAL.saturating_mul(2),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            log_format: LogFormat::Pretty,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = RelayConfig::default();
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.outbound_queue_capacity, 64);
    }

    #[test]
    fn with_heartbeat_rescales_idle_timeout() {
        let config = RelayConfig::default().with_heartbeat(Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Duration::from_millis(500));
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: u64 = parse_env("CATALOG_RELAY_SURELY_UNSET_KEY", 42);
        assert_eq!(value, 42);
    }
}
