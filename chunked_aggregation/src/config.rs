use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Order in which partial results are folded into the aggregate in parallel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CombineOrder {
    /// Fold in partition enumeration order, required for order-sensitive combiners
    #[default]
    Ordered,
    /// Fold as soon as a partial arrives, valid for commutative and associative combiners
    Unordered,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[cfg(feature = "serde")]
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables of an aggregation run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AggregationConfig {
    /// Worker threads used by parallel runs, sequential runs ignore it
    pub workers: usize,
    /// Deadline for a single fetch attempt
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub fetch_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub order: CombineOrder,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            fetch_timeout: None,
            retry: RetryPolicy::none(),
            order: CombineOrder::Ordered,
        }
    }
}

impl AggregationConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_order(mut self, order: CombineOrder) -> Self {
        self.order = order;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if let crate::retry::Backoff::Exponential { base } = self.retry.backoff {
            if !base.is_finite() || base < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "exponential backoff base must be >= 1.0, got {}",
                    base
                )));
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML document, missing keys take their defaults
    #[cfg(feature = "serde")]
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: AggregationConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    #[test]
    fn defaults_are_sequential_without_retries() {
        let config = AggregationConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.order, CombineOrder::Ordered);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_configs() {
        assert!(AggregationConfig::default()
            .with_workers(0)
            .validate()
            .is_err());

        let mut config = AggregationConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry.max_attempts = 2;
        config.retry.backoff = Backoff::Exponential { base: 0.5 };
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn parse_toml() {
        let config = AggregationConfig::from_toml_str(
            r#"
            workers = 4
            fetch_timeout = "250ms"
            order = "unordered"

            [retry]
            max_attempts = 3
            initial_delay = "10ms"
            max_delay = "1s"
            backoff = { exponential = { base = 2.0 } }
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.fetch_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.order, CombineOrder::Unordered);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_delay, Duration::from_secs(1));
        assert_eq!(config.retry.backoff, Backoff::Exponential { base: 2.0 });
    }

    #[cfg(feature = "serde")]
    #[test]
    fn parse_partial_toml_uses_defaults() {
        let config = AggregationConfig::from_toml_str("workers = 2").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry, RetryPolicy::none());

        assert!(AggregationConfig::from_toml_str("workers = 0").is_err());
        assert!(AggregationConfig::from_toml_str("workers = \"many\"").is_err());
    }
}
