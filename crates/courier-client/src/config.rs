//! Client configuration with validation.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Endpoint used when nothing else is configured.
pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";

/// Upper bound on the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered lifecycle events per observer before the slowest one lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid url {0:?}: expected ws:// or wss://")]
    InvalidUrl(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("event_capacity cannot be 0")]
    InvalidCapacity,
}

/// Correlated client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server endpoint
    pub url: String,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Default reply deadline; `None` waits until the connection ends
    pub request_timeout: Option<Duration>,
    /// Capacity of the lifecycle event and message-log broadcast channels
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_URL`: Server endpoint (default: ws://localhost:8080/ws)
    /// - `COURIER_CONNECT_TIMEOUT_MS`: Handshake timeout (default: 10000)
    /// - `COURIER_REQUEST_TIMEOUT_MS`: Reply deadline, 0 = none (default: none)
    /// - `COURIER_EVENT_CAPACITY`: Observer buffer size (default: 64)
    ///
    /// Unparseable numbers fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: env::var("COURIER_URL").unwrap_or(defaults.url),

            connect_timeout: env_u64("COURIER_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),

            request_timeout: env_u64("COURIER_REQUEST_TIMEOUT_MS")
                .map(|ms| (ms > 0).then(|| Duration::from_millis(ms)))
                .unwrap_or(defaults.request_timeout),

            event_capacity: env::var("COURIER_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.event_capacity),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_scheme = self
            .url
            .strip_prefix("ws://")
            .or_else(|| self.url.strip_prefix("wss://"))
            .is_some_and(|rest| !rest.is_empty());
        if !has_scheme {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "connect_timeout cannot be 0".into(),
            ));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0; use None to wait indefinitely".into(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }

        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
