use serde::{Deserialize, Serialize};
use std::env::VarError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or loading a [`RetryConfig`].
#[derive(Error, Debug)]
pub enum RetryConfigError {
    #[error("initial_delay must be greater than zero")]
    ZeroInitialDelay,

    #[error("backoff_multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),

    #[error("environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("invalid retry config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Retry budget and backoff curve for one [`RetryExecutor`](super::RetryExecutor).
///
/// `max_attempts` counts retries after the first try, so `0` runs the
/// operation exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(rename = "initial_delay_ms", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Growth factor applied per retry
    pub backoff_multiplier: f64,
}

/// Prefix of the variables read by [`RetryConfig::from_env`].
pub const ENV_PREFIX: &str = "TXRETRY";

impl RetryConfig {
    /// Create a configuration with the default doubling curve
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Set the retry budget
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.initial_delay.is_zero() {
            return Err(RetryConfigError::ZeroInitialDelay);
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RetryConfigError::InvalidMultiplier(self.backoff_multiplier));
        }

        Ok(())
    }

    /// Delay to wait before retry number `attempt_index + 1`.
    ///
    /// `initial_delay * backoff_multiplier ^ attempt_index`, so the first
    /// retry uses the unscaled initial delay. Saturates at `Duration::MAX`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Parse and validate a JSON document such as
    /// `{"max_attempts": 5, "initial_delay_ms": 250, "backoff_multiplier": 1.5}`.
    ///
    /// Missing fields fall back to [`RetryConfig::default`].
    pub fn from_json(json: &str) -> Result<Self, RetryConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `TXRETRY_*` environment variables, defaulting unset ones.
    pub fn from_env() -> Result<Self, RetryConfigError> {
        Self::from_env_prefixed(ENV_PREFIX)
    }

    /// Load from `{prefix}_MAX_ATTEMPTS`, `{prefix}_INITIAL_DELAY_MS` and
    /// `{prefix}_BACKOFF_MULTIPLIER`, defaulting unset ones.
    ///
    /// A variable that is set but not valid UTF-8 is an error, not a default.
    pub fn from_env_prefixed(prefix: &str) -> Result<Self, RetryConfigError> {
        let defaults = Self::default();

        let max_attempts = env_parse(&format!("{prefix}_MAX_ATTEMPTS"), defaults.max_attempts)?;
        let initial_delay_ms = env_parse(
            &format!("{prefix}_INITIAL_DELAY_MS"),
            defaults.initial_delay.as_millis() as u64,
        )?;
        let backoff_multiplier = env_parse(
            &format!("{prefix}_BACKOFF_MULTIPLIER"),
            defaults.backoff_multiplier,
        )?;

        let config = Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            backoff_multiplier,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, RetryConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| RetryConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw,
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(raw)) => Err(RetryConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
