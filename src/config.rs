//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:7125`).
    pub listen_addr: SocketAddr,

    /// Path of the Klippy Unix domain socket.
    pub klippy_address: PathBuf,

    /// Fixed delay between backend connection attempts.
    pub reconnect_delay: Duration,

    /// Interval of the post-connect readiness poll.
    pub init_interval: Duration,

    /// How often a long-running request logs that it is still pending.
    pub request_log_interval: Duration,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,

    /// Period of the heater temperature sampler.
    pub temperature_sample_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7125)),
            klippy_address: PathBuf::from("/tmp/klippy_uds"),
            reconnect_delay: Duration::from_secs(1),
            init_interval: Duration::from_secs(1),
            request_log_interval: Duration::from_secs(60),
            event_bus_capacity: 1024,
            temperature_sample_interval: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let klippy_address = std::env::var("KLIPPY_UDS_ADDRESS")
            .map(PathBuf::from)
            .unwrap_or(defaults.klippy_address);

        let reconnect_delay = Duration::from_millis(parse_env("KLIPPY_RECONNECT_DELAY_MS", 1000));
        let init_interval = Duration::from_millis(parse_env("KLIPPY_INIT_INTERVAL_MS", 1000));
        let request_log_interval =
            Duration::from_secs(parse_env("REQUEST_LOG_INTERVAL_SECS", 60));

        let event_bus_capacity = parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity);
        let temperature_sample_interval =
            Duration::from_millis(parse_env("TEMPERATURE_SAMPLE_INTERVAL_MS", 1000));

        Ok(Self {
            listen_addr,
            klippy_address,
            reconnect_delay,
            init_interval,
            request_log_interval,
            event_bus_capacity,
            temperature_sample_interval,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
