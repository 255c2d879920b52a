//! Retry with exponential backoff
//!
//! The runner does not loop inside a handler call: a retryable failure is
//! re-emitted as a fresh event with `retry_count + 1` after the computed
//! delay, so retries go back through the queue and every hook. This module
//! decides whether and when.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::DispatchError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries are off unless explicitly enabled
    pub enabled: bool,
    /// Maximum number of retry attempts (not counting initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each time)
    pub backoff_multiplier: f64,
    /// Optional jitter factor (0.0 to 1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Enabled config with defaults
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set max delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// What to do with a failed agent invocation
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-emit as attempt `attempt` (1-based retry number) after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Out of retries after `attempts` total invocations: dead-letter it
    Exhausted { attempts: u32 },
    /// Retries disabled or the error is not transient
    GiveUp,
}

/// Retry policy computing backoff delays and retry decisions
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jittered_delay = if self.config.jitter > 0.0 {
            let jitter_range = capped_delay * self.config.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(jittered_delay as u64)
    }

    /// Decide for an event that already went through `retry_count` retries
    pub fn decide(&self, error: &DispatchError, retry_count: u32) -> RetryDecision {
        if !self.config.enabled || !error.is_recoverable() {
            return RetryDecision::GiveUp;
        }
        if retry_count < self.config.max_retries {
            RetryDecision::Retry {
                attempt: retry_count + 1,
                delay: self.calculate_delay(retry_count),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: retry_count.saturating_add(1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> DispatchError {
        DispatchError::Handler {
            agent: "a".into(),
            message: "flaky".into(),
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_delays_without_jitter() {
        let policy = RetryPolicy::new(RetryConfig::enabled().with_jitter(0.0));
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(
            RetryConfig::enabled()
                .with_jitter(0.0)
                .with_max_delay(Duration::from_millis(250)),
        );
        assert_eq!(policy.calculate_delay(10), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig::enabled().with_jitter(0.5));
        for _ in 0..100 {
            let delay = policy.calculate_delay(0).as_millis();
            assert!((50..=150).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_decide_retry_then_exhausted() {
        let policy = RetryPolicy::new(RetryConfig::enabled().with_max_retries(2).with_jitter(0.0));

        assert_eq!(
            policy.decide(&transient(), 0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert!(matches!(
            policy.decide(&transient(), 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert_eq!(
            policy.decide(&transient(), 2),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn test_saturated_retry_count_is_exhausted() {
        let policy = RetryPolicy::new(RetryConfig::enabled());
        assert_eq!(
            policy.decide(&transient(), u32::MAX),
            RetryDecision::Exhausted { attempts: u32::MAX }
        );
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(RetryConfig::enabled());
        let err = DispatchError::AgentNotFound { agent: "Z".into() };
        assert_eq!(policy.decide(&err, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_disabled_policy_gives_up() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.decide(&transient(), 0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_config_serde_uses_milliseconds() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"enabled":true,"initial_delay_ms":5,"max_retries":1}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.initial_delay, Duration::from_millis(5));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.max_retries, 1);
    }
}
