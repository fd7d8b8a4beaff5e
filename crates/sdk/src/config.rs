//! Cache and subscription configuration with validated builders.
//!
//! All config structs validate their values at construction time via
//! fallible builders. Post-deserialization validation is available via
//! the `validate` method on each struct, so configs can be embedded in an
//! application's TOML with humantime durations (`"250ms"`, `"30s"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{ConfigSnafu, Result};

/// Which of the two observed ledger read shapes to use for status reads.
///
/// Both are the same semantic read (`taken == !mintable`); the SDK stores
/// `taken` internally and adapts to whichever predicate the ledger exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSurface {
    /// `isKeyMintable(key)`: true means available.
    #[default]
    Mintable,
    /// `isKeyMinted(key)`: true means taken.
    Minted,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, bon::Builder, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    #[builder(default = 3)]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry.
    #[builder(default = Duration::from_millis(100))]
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    #[builder(default = Duration::from_secs(10))]
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential increase.
    #[builder(default = 2.0)]
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) for randomizing backoff.
    #[builder(default = 0.25)]
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Validates the policy values.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::SdkError::Config) if:
    /// - `max_attempts` is 0
    /// - `multiplier` < 1.0
    /// - `jitter` is outside 0.0..=1.0
    /// - `initial_backoff` > `max_backoff`
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts > 0, ConfigSnafu { message: "max_attempts must be > 0" });
        ensure!(
            self.multiplier >= 1.0,
            ConfigSnafu { message: format!("multiplier must be >= 1.0, got {}", self.multiplier) }
        );
        ensure!(
            (0.0..=1.0).contains(&self.jitter),
            ConfigSnafu { message: format!("jitter must be within 0.0..=1.0, got {}", self.jitter) }
        );
        ensure!(
            self.initial_backoff <= self.max_backoff,
            ConfigSnafu {
                message: format!(
                    "initial_backoff ({:?}) must not exceed max_backoff ({:?})",
                    self.initial_backoff, self.max_backoff
                )
            }
        );
        Ok(())
    }
}

/// Status cache configuration.
///
/// # Validation Rules
///
/// - `request_timeout`, `mutation_timeout` and `freshness` must be > 0
/// - `max_batch_keys` must be > 0
/// - `read_retry` must pass [`RetryPolicy::validate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Timeout for every individual ledger read.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long `mutate` waits for a terminal outcome.
    ///
    /// The submitted mint keeps running after this elapses.
    #[serde(default = "default_mutation_timeout", with = "humantime_serde")]
    pub mutation_timeout: Duration,
    /// Age after which a fresh entry is re-fetched on access.
    #[serde(default = "default_freshness", with = "humantime_serde")]
    pub freshness: Duration,
    /// How long a fetch waits for other requests to join its batch.
    #[serde(default = "default_batch_window", with = "humantime_serde")]
    pub batch_window: Duration,
    /// Largest number of keys sent in one multicall.
    #[serde(default = "default_max_batch_keys")]
    pub max_batch_keys: usize,
    /// Whether range reads also resolve owners of taken keys.
    #[serde(default = "default_resolve_owners")]
    pub resolve_owners: bool,
    /// Ledger read shape used for status reads.
    #[serde(default)]
    pub read_surface: ReadSurface,
    /// In-call retry for transient read faults.
    #[serde(default = "RetryPolicy::no_retry")]
    pub read_retry: RetryPolicy,
}

#[bon::bon]
impl CacheConfig {
    /// Creates a new cache configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::SdkError::Config) if any value
    /// violates the validation rules.
    #[builder]
    pub fn new(
        #[builder(default = default_request_timeout())] request_timeout: Duration,
        #[builder(default = default_mutation_timeout())] mutation_timeout: Duration,
        #[builder(default = default_freshness())] freshness: Duration,
        #[builder(default = default_batch_window())] batch_window: Duration,
        #[builder(default = default_max_batch_keys())] max_batch_keys: usize,
        #[builder(default = default_resolve_owners())] resolve_owners: bool,
        #[builder(default)] read_surface: ReadSurface,
        #[builder(default = RetryPolicy::no_retry())] read_retry: RetryPolicy,
    ) -> Result<Self> {
        let config = Self {
            request_timeout,
            mutation_timeout,
            freshness,
            batch_window,
            max_batch_keys,
            resolve_owners,
            read_surface,
            read_retry,
        };
        config.validate()?;
        Ok(config)
    }
}

impl CacheConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::SdkError::Config) if any value is
    /// out of range.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.request_timeout.is_zero(),
            ConfigSnafu { message: "request_timeout cannot be zero" }
        );
        ensure!(
            !self.mutation_timeout.is_zero(),
            ConfigSnafu { message: "mutation_timeout cannot be zero" }
        );
        ensure!(!self.freshness.is_zero(), ConfigSnafu { message: "freshness cannot be zero" });
        ensure!(self.max_batch_keys > 0, ConfigSnafu { message: "max_batch_keys must be > 0" });
        self.read_retry.validate()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            mutation_timeout: default_mutation_timeout(),
            freshness: default_freshness(),
            batch_window: default_batch_window(),
            max_batch_keys: default_max_batch_keys(),
            resolve_owners: default_resolve_owners(),
            read_surface: ReadSurface::default(),
            read_retry: RetryPolicy::no_retry(),
        }
    }
}

/// Subscription channel configuration.
///
/// # Validation Rules
///
/// - `connect_timeout` and `degraded_probe_interval` must be > 0
/// - `reconnect` must pass [`RetryPolicy::validate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Backoff policy while reconnecting after a disconnect.
    #[serde(default = "default_reconnect_policy")]
    pub reconnect: RetryPolicy,
    /// Timeout for opening the event stream.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Interval between reconnect probes once the retry budget is spent.
    #[serde(default = "default_degraded_probe_interval", with = "humantime_serde")]
    pub degraded_probe_interval: Duration,
}

#[bon::bon]
impl SubscriptionConfig {
    /// Creates a new subscription configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::SdkError::Config) if any value
    /// violates the validation rules.
    #[builder]
    pub fn new(
        #[builder(default = default_reconnect_policy())] reconnect: RetryPolicy,
        #[builder(default = default_connect_timeout())] connect_timeout: Duration,
        #[builder(default = default_degraded_probe_interval())] degraded_probe_interval: Duration,
    ) -> Result<Self> {
        let config = Self { reconnect, connect_timeout, degraded_probe_interval };
        config.validate()?;
        Ok(config)
    }
}

impl SubscriptionConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`](crate::SdkError::Config) if any value is
    /// out of range.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );
        ensure!(
            !self.degraded_probe_interval.is_zero(),
            ConfigSnafu { message: "degraded_probe_interval cannot be zero" }
        );
        self.reconnect.validate()
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            reconnect: default_reconnect_policy(),
            connect_timeout: default_connect_timeout(),
            degraded_probe_interval: default_degraded_probe_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_mutation_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_freshness() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_window() -> Duration {
    Duration::from_millis(2)
}

fn default_max_batch_keys() -> usize {
    64
}

fn default_resolve_owners() -> bool {
    true
}

fn default_reconnect_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 6,
        initial_backoff: Duration::from_millis(250),
        max_backoff: Duration::from_secs(10),
        multiplier: 2.0,
        jitter: 0.25,
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_degraded_probe_interval() -> Duration {
    Duration::from_secs(30)
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    // =========================================================================
    // CacheConfig
    // =========================================================================

    #[test]
    fn test_cache_config_defaults_are_valid() {
        let config = CacheConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.freshness, Duration::from_secs(30));
        assert_eq!(config.read_surface, ReadSurface::Mintable);
        assert_eq!(config.read_retry.max_attempts, 1);
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_cache_config_rejects_zero_request_timeout() {
        let err = CacheConfig::builder().request_timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, SdkError::Config { .. }));
        assert!(err.to_string().contains("request_timeout"));
    }

    #[test]
    fn test_cache_config_rejects_zero_mutation_timeout() {
        assert!(CacheConfig::builder().mutation_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn test_cache_config_rejects_zero_batch_size() {
        assert!(CacheConfig::builder().max_batch_keys(0).build().is_err());
    }

    #[test]
    fn test_cache_config_allows_zero_batch_window() {
        let config = CacheConfig::builder().batch_window(Duration::ZERO).build().unwrap();
        assert!(config.batch_window.is_zero());
    }

    #[test]
    fn test_cache_config_rejects_invalid_read_retry() {
        let retry = RetryPolicy::builder().max_attempts(0).build();
        assert!(CacheConfig::builder().read_retry(retry).build().is_err());
    }

    #[test]
    fn test_cache_config_from_toml() {
        let config: CacheConfig = toml::from_str(
            r#"
            request_timeout = "2s"
            freshness = "1m"
            read_surface = "minted"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.freshness, Duration::from_secs(60));
        assert_eq!(config.read_surface, ReadSurface::Minted);
        assert_eq!(config.mutation_timeout, Duration::from_secs(120));
    }

    // =========================================================================
    // RetryPolicy
    // =========================================================================

    #[test]
    fn test_retry_policy_builder_defaults_match_default() {
        assert_eq!(RetryPolicy::builder().build(), RetryPolicy::default());
    }

    #[test]
    fn test_retry_policy_rejects_excess_jitter() {
        let policy = RetryPolicy::builder().jitter(1.5).build();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_retry_policy_rejects_inverted_backoff() {
        let policy = RetryPolicy::builder()
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(policy.validate().is_err());
    }

    // =========================================================================
    // SubscriptionConfig
    // =========================================================================

    #[test]
    fn test_subscription_config_defaults_are_valid() {
        let config = SubscriptionConfig::builder().build().unwrap();
        assert_eq!(config.reconnect.max_attempts, 6);
        assert_eq!(config, SubscriptionConfig::default());
    }

    #[test]
    fn test_subscription_config_rejects_zero_probe_interval() {
        let err = SubscriptionConfig::builder()
            .degraded_probe_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("degraded_probe_interval"));
    }
}
