//! Client configuration.
//!
//! `ClientConfig` carries everything the connection owner and the session
//! need: the server address, per-request deadline, keepalive timings, message
//! size limit and the request admission rate.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Default values applied by [`ClientConfig::new`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const REQUEST_DEADLINE: Duration = Duration::from_secs(10);
    pub const INACTIVE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const REQUEST_RATE_LIMIT: f64 = 10.0;
    pub const REQUEST_RATE_BURST: u32 = 1;
    pub const CHANNEL_CAPACITY: usize = 1;
}

/// Connection, session and admission settings.
///
/// Durations deserialize from integer milliseconds (`request_deadline_ms`,
/// `inactive_timeout_ms`, `keep_alive_timeout_ms`).
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Base address of the feed server, `http(s)://` or `ws(s)://`.
    pub server_uri: String,
    /// Name sent with every stream subscription.
    #[serde(default)]
    pub client_name: String,
    /// Deadline applied to unary requests and stream establishment.
    #[serde(
        rename = "request_deadline_ms",
        default = "default_request_deadline",
        deserialize_with = "duration_from_millis"
    )]
    pub request_deadline: Duration,
    /// Idle time on a stream after which a keepalive ping is sent.
    #[serde(
        rename = "inactive_timeout_ms",
        default = "default_inactive_timeout",
        deserialize_with = "duration_from_millis"
    )]
    pub inactive_timeout: Duration,
    /// Time to wait for any frame after a keepalive ping.
    #[serde(
        rename = "keep_alive_timeout_ms",
        default = "default_keep_alive_timeout",
        deserialize_with = "duration_from_millis"
    )]
    pub keep_alive_timeout: Duration,
    /// Upper bound for a single inbound message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Sustained outbound request rate, requests per second.
    #[serde(default = "default_request_rate_limit")]
    pub request_rate_limit: f64,
    /// Number of requests admitted back to back before throttling.
    #[serde(default = "default_request_rate_burst")]
    pub request_rate_burst: u32,
    /// Buffer of each consumer-facing channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ClientConfig {
    /// Creates a config for `server_uri` with default timings and limits.
    pub fn new(server_uri: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into().trim_end().to_string(),
            client_name: String::new(),
            request_deadline: ClientDefaults::REQUEST_DEADLINE,
            inactive_timeout: ClientDefaults::INACTIVE_TIMEOUT,
            keep_alive_timeout: ClientDefaults::KEEP_ALIVE_TIMEOUT,
            max_message_size: ClientDefaults::MAX_MESSAGE_SIZE,
            request_rate_limit: ClientDefaults::REQUEST_RATE_LIMIT,
            request_rate_burst: ClientDefaults::REQUEST_RATE_BURST,
            channel_capacity: ClientDefaults::CHANNEL_CAPACITY,
        }
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// Sets the idle interval before a keepalive ping and the ping timeout.
    pub fn with_keep_alive(mut self, inactive_timeout: Duration, timeout: Duration) -> Self {
        self.inactive_timeout = inactive_timeout;
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the admission rate (requests per second) and burst size.
    pub fn with_rate_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.request_rate_limit = per_second;
        self.request_rate_burst = burst;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Checks that every setting is usable before any connection is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uri = self.server_uri.trim();
        if uri.is_empty() {
            return Err(ConfigError::MissingServerUri);
        }
        if !["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| uri.starts_with(scheme))
        {
            return Err(ConfigError::UnsupportedScheme(uri.to_string()));
        }

        for (field, value) in [
            ("request_deadline", self.request_deadline),
            ("inactive_timeout", self.inactive_timeout),
            ("keep_alive_timeout", self.keep_alive_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(field));
            }
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0"));
        }
        if !self.request_rate_limit.is_finite() || self.request_rate_limit <= 0.0 {
            return Err(ConfigError::Invalid(
                "request_rate_limit must be a finite number > 0",
            ));
        }
        if self.request_rate_burst == 0 {
            return Err(ConfigError::Invalid("request_rate_burst must be > 0"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Configuration validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("server_uri is empty")]
    MissingServerUri,

    #[error("server_uri {0:?} must start with http://, https://, ws:// or wss://")]
    UnsupportedScheme(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn default_request_deadline() -> Duration {
    ClientDefaults::REQUEST_DEADLINE
}

fn default_inactive_timeout() -> Duration {
    ClientDefaults::INACTIVE_TIMEOUT
}

fn default_keep_alive_timeout() -> Duration {
    ClientDefaults::KEEP_ALIVE_TIMEOUT
}

fn default_max_message_size() -> usize {
    ClientDefaults::MAX_MESSAGE_SIZE
}

fn default_request_rate_limit() -> f64 {
    ClientDefaults::REQUEST_RATE_LIMIT
}

fn default_request_rate_burst() -> u32 {
    ClientDefaults::REQUEST_RATE_BURST
}

fn default_channel_capacity() -> usize {
    ClientDefaults::CHANNEL_CAPACITY
}
