//! Client Configuration Settings
//!
//! Configuration types for the price stream client, loaded from environment
//! variables. Every variable is optional and falls back to its default.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{ConnectionConfig, DEFAULT_URL, GeneratorConfig, RetryConfig};
use crate::domain::price::PriceBounds;

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Feed endpoint.
    pub url: String,
    /// Upper bound for one open attempt.
    pub connect_timeout: Duration,
    /// Steady delay between attempts once the backoff table is exhausted.
    pub reconnect_delay: Duration,
    /// Attempts that follow the backoff table.
    pub max_retry_attempts: u32,
    /// Ascending backoff table.
    pub backoff: Vec<Duration>,
    /// Interval between reachability probes.
    pub probe_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_retry_attempts: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl From<ConnectionSettings> for ConnectionConfig {
    fn from(settings: ConnectionSettings) -> Self {
        Self {
            url: settings.url,
            connect_timeout: settings.connect_timeout,
            reconnect_delay: settings.reconnect_delay,
            retry: RetryConfig::new(settings.max_retry_attempts, settings.backoff),
        }
    }
}

/// Synthetic price generator settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSettings {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Maximum relative move per tick.
    pub volatility: f64,
    /// Price bounds applied to generated and received prices.
    pub bounds: PriceBounds,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            volatility: 0.02,
            bounds: PriceBounds::default(),
        }
    }
}

impl From<GeneratorSettings> for GeneratorConfig {
    fn from(settings: GeneratorSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            volatility: settings.volatility,
            bounds: settings.bounds,
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Buffered updates per subscriber.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientConfig {
    /// Feed connection settings.
    pub connection: ConnectionSettings,
    /// Generator settings.
    pub generator: GeneratorSettings,
    /// Fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };
        let defaults = Self::default();

        let url = env
            .raw("PRICE_STREAM_URL")
            .unwrap_or(defaults.connection.url);

        let connection = ConnectionSettings {
            url,
            connect_timeout: env.secs(
                "PRICE_STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connection.connect_timeout,
            )?,
            reconnect_delay: env.secs(
                "PRICE_STREAM_RECONNECT_DELAY_SECS",
                defaults.connection.reconnect_delay,
            )?,
            max_retry_attempts: env.parse(
                "PRICE_STREAM_MAX_RETRY_ATTEMPTS",
                defaults.connection.max_retry_attempts,
            )?,
            backoff: env.secs_list("PRICE_STREAM_BACKOFF_SECS", defaults.connection.backoff)?,
            probe_interval: env.secs(
                "PRICE_STREAM_PROBE_INTERVAL_SECS",
                defaults.connection.probe_interval,
            )?,
        };

        let min_price = env.parse("PRICE_STREAM_MIN_PRICE", defaults.generator.bounds.min())?;
        let max_price = env.parse("PRICE_STREAM_MAX_PRICE", defaults.generator.bounds.max())?;
        let bounds = PriceBounds::new(min_price, max_price)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let generator = GeneratorSettings {
            tick_interval: env.millis(
                "PRICE_STREAM_TICK_INTERVAL_MS",
                defaults.generator.tick_interval,
            )?,
            volatility: env.parse("PRICE_STREAM_VOLATILITY", defaults.generator.volatility)?,
            bounds,
        };

        let broadcast = BroadcastSettings {
            subscriber_capacity: env.parse(
                "PRICE_STREAM_SUBSCRIBER_CAPACITY",
                defaults.broadcast.subscriber_capacity,
            )?,
        };

        let server = ServerSettings {
            health_port: env.parse("PRICE_STREAM_HEALTH_PORT", defaults.server.health_port)?,
        };

        let config = Self {
            connection,
            generator,
            broadcast,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_STREAM_URL".to_string()));
        }
        if self.connection.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect timeout must be positive".to_string(),
            ));
        }
        if self.connection.probe_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "probe interval must be positive".to_string(),
            ));
        }
        if self.connection.backoff.is_empty() {
            return Err(ConfigError::Invalid("backoff table is empty".to_string()));
        }
        if self.connection.backoff.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::Invalid(
                "backoff table must be ascending".to_string(),
            ));
        }
        if self.generator.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick interval must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.generator.volatility) {
            return Err(ConfigError::Invalid(format!(
                "volatility {} outside [0, 1)",
                self.generator.volatility
            )));
        }
        if self.broadcast.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid(
                "subscriber capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Parsed values violate a configuration rule.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse::<u64>(key, default.as_secs())
            .map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse::<u64>(key, default_ms).map(Duration::from_millis)
    }

    fn secs_list(&self, key: &str, default: Vec<Duration>) -> Result<Vec<Duration>, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        value
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.clone(),
                    })
            })
            .collect()
    }
}
