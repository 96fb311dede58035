use std::time::Duration;

use thiserror::Error;

use crate::gateway::session::DEFAULT_OUTBOUND_CAPACITY;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Backend API origin (e.g. `http://localhost:8000`).
    pub backend_url: String,
    /// Shared secret sent as `X-Internal-API-Key` on internal backend calls.
    pub internal_api_key: String,
    /// Largest inbound WebSocket message accepted from a client, in bytes.
    pub max_message_size: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// How often the outbound flow sends a ping. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// How long the inbound flow waits for a pong before giving up on the peer.
    pub pong_wait: Duration,
    /// Upper bound on a single socket write.
    pub write_wait: Duration,
    /// Upper bound on a single backend request.
    pub backend_timeout: Duration,
    /// Per-session outbound queue capacity.
    pub outbound_capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} env var is required")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as unset. Numeric values that fail to parse fall
    /// back to their defaults.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let num = |name: &str, default: u64| {
            var(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let config = Self {
            port: var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            backend_url: var("BACKEND_API_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string())
                .trim_end_matches('/')
                .to_string(),
            internal_api_key: var("INTERNAL_API_KEY")
                .ok_or(ConfigError::Missing("INTERNAL_API_KEY"))?,
            max_message_size: num("MAX_MESSAGE_SIZE", 512_000) as usize,
            read_buffer_size: num("READ_BUFFER_SIZE", 1024) as usize,
            write_buffer_size: num("WRITE_BUFFER_SIZE", 1024) as usize,
            ping_period: Duration::from_secs(num("PING_PERIOD", 54)),
            pong_wait: Duration::from_secs(num("PONG_WAIT", 60)),
            write_wait: Duration::from_secs(num("WRITE_WAIT", 10)),
            backend_timeout: Duration::from_secs(num("BACKEND_TIMEOUT", 10)),
            outbound_capacity: num("OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_CAPACITY as u64) as usize,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period.is_zero() || self.write_wait.is_zero() {
            return Err(ConfigError::Invalid(
                "PING_PERIOD and WRITE_WAIT must be at least 1s".to_string(),
            ));
        }
        if self.ping_period >= self.pong_wait {
            return Err(ConfigError::Invalid(format!(
                "PING_PERIOD ({}s) must be shorter than PONG_WAIT ({}s)",
                self.ping_period.as_secs(),
                self.pong_wait.as_secs()
            )));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
