//! # Connector Configuration
//!
//! Timing knobs for binding and idling, plus the transport settings used for
//! every call. Defaults match the host platform's expectations; everything can
//! be overridden in code or through `SIBRUN_*` environment variables.

use std::time::Duration;

use sibrpc::TransportConfig;

use crate::error::ConfigError;

pub const ENV_IDLE_TIMEOUT_MS: &str = "SIBRUN_IDLE_TIMEOUT_MS";
pub const ENV_BIND_TIMEOUT_MS: &str = "SIBRUN_BIND_TIMEOUT_MS";
pub const ENV_BIND_RETRY_MS: &str = "SIBRUN_BIND_RETRY_MS";
pub const ENV_BIND_RETRY_MAX_MS: &str = "SIBRUN_BIND_RETRY_MAX_MS";
pub const ENV_BLOCK_SIZE: &str = "SIBRUN_BLOCK_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub transport: TransportConfig,
    /// How long a bound channel with no holders survives.
    pub idle_timeout: Duration,
    /// Upper bound on a single bind attempt.
    pub bind_timeout: Duration,
    /// First backoff after a failed bind. Doubles on each further failure.
    pub initial_bind_retry_delay: Duration,
    pub max_bind_retry_delay: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            idle_timeout: Duration::from_secs(30),
            bind_timeout: Duration::from_secs(60),
            initial_bind_retry_delay: Duration::from_millis(500),
            max_bind_retry_delay: Duration::from_secs(60),
        }
    }
}

impl ConnectorConfig {
    /// Defaults overridden by any `SIBRUN_*` variables present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = read_u64(&lookup, ENV_IDLE_TIMEOUT_MS)? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BIND_TIMEOUT_MS)? {
            config.bind_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BIND_RETRY_MS)? {
            config.initial_bind_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BIND_RETRY_MAX_MS)? {
            config.max_bind_retry_delay = Duration::from_millis(ms);
        }
        if let Some(size) = read_u64(&lookup, ENV_BLOCK_SIZE)? {
            config.transport = config.transport.with_block_size(size as usize);
        }
        Ok(config)
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    pub fn with_bind_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_bind_retry_delay = initial;
        self.max_bind_retry_delay = max.max(initial);
        self
    }
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::Invalid { var, value }),
        },
    }
}
