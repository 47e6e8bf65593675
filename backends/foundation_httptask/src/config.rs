//! Configuration for client tasks.
//!
//! Values are plain milliseconds so they read naturally from TOML:
//!
//! ```toml
//! connect_timeout_ms = 5000
//! io_timeout_ms = 10000
//! resolve_timeout_ms = 2000
//! poll_interval_ms = 100
//! user_agent = "ewe-httptask/0.0.1"
//! thread_name = "media-notifier"
//! ```
//!
//! Missing keys fall back to [`ClientTaskConfig::default`].

use derive_more::derive::From;
use serde::Deserialize;
use std::time::Duration;

use crate::client::ConnectTimeouts;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_USER_AGENT: &str = concat!("ewe-httptask/", env!("CARGO_PKG_VERSION"));
const DEFAULT_THREAD_NAME: &str = "http-client-task";

#[derive(Debug, From)]
pub enum ConfigError {
    #[from(ignore)]
    IOError(std::io::Error),

    #[from(ignore)]
    DeserializationFailed(toml::de::Error),

    #[from(ignore)]
    InvalidValue(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::DeserializationFailed(value)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tunables of a single [`crate::client::HttpClientTask`].
///
/// A timeout of `0` disables the matching deadline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientTaskConfig {
    /// Budget for establishing a transport connection.
    pub connect_timeout_ms: u64,
    /// Read and write deadline applied to established connections.
    pub io_timeout_ms: u64,
    /// Budget for resolving the target hostname.
    pub resolve_timeout_ms: u64,
    /// How long an idle task waits on its queue before looking at its abort signal.
    pub poll_interval_ms: u64,
    /// Sent as `User-Agent` unless the request carries its own.
    pub user_agent: String,
    /// Name given to the worker thread by [`crate::client::HttpClientTask::spawn`].
    pub thread_name: String,
}

impl Default for ClientTaskConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_TIMEOUT_MS,
            resolve_timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ClientTaskConfig {
    /// `from_path` reads and validates a TOML configuration file.
    pub fn from_path<V: Into<std::path::PathBuf>>(target: V) -> ConfigResult<Self> {
        let target_path = target.into();
        let config_content = std::fs::read_to_string(target_path)?;
        Self::from_toml_str(&config_content)
    }

    /// `from_toml_str` parses and validates TOML configuration content.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the task cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_millis(timeout);
        self
    }

    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = duration_to_millis(timeout);
        self
    }

    #[must_use]
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout_ms = duration_to_millis(timeout);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_millis(interval).max(1);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn timeouts(&self) -> ConnectTimeouts {
        ConnectTimeouts {
            connect: millis_to_deadline(self.connect_timeout_ms),
            io: millis_to_deadline(self.io_timeout_ms),
            resolve: millis_to_deadline(self.resolve_timeout_ms),
        }
    }
}

fn millis_to_deadline(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
