//! Runner configuration
//!
//! `RunnerConfig` is serde-loadable (durations in milliseconds) so callers
//! can embed it in whatever config format they own. Environment variables
//! override loaded values via `with_env()`:
//!
//! - `SWITCHYARD_QUEUE_CAPACITY`
//! - `SWITCHYARD_HANDLER_TIMEOUT_MS`
//! - `SWITCHYARD_DRAIN_TIMEOUT_MS`
//! - `SWITCHYARD_MAX_HOPS`
//! - `SWITCHYARD_MAX_RETRIES` (also enables retries)
//! - `SWITCHYARD_DEAD_LETTER`
//! - `SWITCHYARD_ERROR_HANDLER` (also enables error routing)

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DispatchError, Result};
use crate::resilience::{CircuitBreakerConfig, ErrorRoutingConfig, RetryConfig};

pub const ENV_QUEUE_CAPACITY: &str = "SWITCHYARD_QUEUE_CAPACITY";
pub const ENV_HANDLER_TIMEOUT_MS: &str = "SWITCHYARD_HANDLER_TIMEOUT_MS";
pub const ENV_DRAIN_TIMEOUT_MS: &str = "SWITCHYARD_DRAIN_TIMEOUT_MS";
pub const ENV_MAX_HOPS: &str = "SWITCHYARD_MAX_HOPS";
pub const ENV_MAX_RETRIES: &str = "SWITCHYARD_MAX_RETRIES";
pub const ENV_DEAD_LETTER: &str = "SWITCHYARD_DEAD_LETTER";
pub const ENV_ERROR_HANDLER: &str = "SWITCHYARD_ERROR_HANDLER";

/// Runtime knobs for a `Runner`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Bounded queue size; `emit` fails with `QueueFull` beyond it
    pub queue_capacity: usize,
    /// Handler deadline when the event declares no `timeout_ms`
    #[serde(with = "duration_ms", rename = "handler_timeout_ms")]
    pub default_handler_timeout: Duration,
    /// How long `stop()` waits for queued events before discarding them
    #[serde(with = "duration_ms", rename = "drain_timeout_ms")]
    pub drain_timeout: Duration,
    /// Events with a larger hop count are rejected with `LoopDetected`
    pub max_hops: u32,
    pub retry: RetryConfig,
    /// Agent receiving events that exhausted their retries
    pub dead_letter_target: Option<String>,
    /// Per-callback deadline (none by default)
    #[serde(with = "duration_ms::option", rename = "callback_timeout_ms")]
    pub callback_timeout: Option<Duration>,
    pub error_routing: ErrorRoutingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            default_handler_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            max_hops: 10,
            retry: RetryConfig::default(),
            dead_letter_target: None,
            callback_timeout: None,
            error_routing: ErrorRoutingConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Short deadlines for tests
    pub fn testing() -> Self {
        Self {
            queue_capacity: 64,
            default_handler_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
            max_hops: 5,
            retry: RetryConfig::default(),
            dead_letter_target: None,
            callback_timeout: Some(Duration::from_secs(2)),
            error_routing: ErrorRoutingConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.default_handler_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dead_letter(mut self, target: impl Into<String>) -> Self {
        self.dead_letter_target = Some(target.into());
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    pub fn with_error_routing(mut self, routing: ErrorRoutingConfig) -> Self {
        self.error_routing = routing;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over loaded values; unparsable
    /// values are ignored with a warning.
    pub fn with_env(mut self) -> Self {
        if let Some(capacity) = env_parse::<usize>(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = capacity;
        }
        if let Some(ms) = env_parse::<u64>(ENV_HANDLER_TIMEOUT_MS) {
            self.default_handler_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(ENV_DRAIN_TIMEOUT_MS) {
            self.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(hops) = env_parse::<u32>(ENV_MAX_HOPS) {
            self.max_hops = hops;
        }
        if let Some(retries) = env_parse::<u32>(ENV_MAX_RETRIES) {
            self.retry.enabled = true;
            self.retry.max_retries = retries;
        }
        if let Ok(target) = std::env::var(ENV_DEAD_LETTER) {
            if !target.trim().is_empty() {
                self.dead_letter_target = Some(target.trim().to_string());
            }
        }
        if let Ok(handler) = std::env::var(ENV_ERROR_HANDLER) {
            if !handler.trim().is_empty() {
                self.error_routing.enabled = true;
                self.error_routing.default_handler = Some(handler.trim().to_string());
            }
        }
        self
    }

    /// Reject values the runner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }
        if self.default_handler_timeout.is_zero() {
            return Err(invalid("handler_timeout_ms must be greater than 0"));
        }
        if self.callback_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("callback_timeout_ms must be greater than 0"));
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return Err(invalid("retry.backoff_multiplier must be >= 1.0"));
        }
        if self
            .dead_letter_target
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(invalid("dead_letter_target must not be blank"));
        }
        if self.error_routing.enabled && self.error_routing.handlers().any(|h| h.trim().is_empty()) {
            return Err(invalid("error_routing handler names must not be blank"));
        }
        let breaker = &self.circuit_breaker;
        if breaker.enabled
            && (breaker.failure_threshold == 0
                || breaker.success_threshold == 0
                || breaker.half_open_max_calls == 0)
        {
            return Err(invalid(
                "circuit_breaker thresholds and half_open_max_calls must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> DispatchError {
    DispatchError::InvalidConfig {
        reason: reason.to_string(),
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Serde helpers: `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for key in [
            ENV_QUEUE_CAPACITY,
            ENV_HANDLER_TIMEOUT_MS,
            ENV_DRAIN_TIMEOUT_MS,
            ENV_MAX_HOPS,
            ENV_MAX_RETRIES,
            ENV_DEAD_LETTER,
            ENV_ERROR_HANDLER,
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.max_hops, 10);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.dead_letter_target.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: RunnerConfig = serde_json::from_str(
            r#"{"queue_capacity": 8, "handler_timeout_ms": 250, "dead_letter_target": "dlq",
                "retry": {"enabled": true}}"#,
        )
        .unwrap();

        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.default_handler_timeout, Duration::from_millis(250));
        assert_eq!(config.dead_letter_target.as_deref(), Some("dlq"));
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.callback_timeout, None);
    }

    #[test]
    fn test_serialize_uses_millisecond_keys() {
        let json = serde_json::to_value(RunnerConfig::default().with_callback_timeout(Duration::from_millis(40)))
            .unwrap();
        assert_eq!(json["handler_timeout_ms"], 30_000);
        assert_eq!(json["drain_timeout_ms"], 5_000);
        assert_eq!(json["callback_timeout_ms"], 40);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = RunnerConfig::default().with_queue_capacity(0).validate().unwrap_err();
        assert_eq!(err.code(), "SWY-050");
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let config = RunnerConfig::default()
            .with_retry(RetryConfig::enabled().with_backoff_multiplier(0.5));
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        clear_env();
        env::set_var(ENV_QUEUE_CAPACITY, "7");
        env::set_var(ENV_HANDLER_TIMEOUT_MS, "1500");
        env::set_var(ENV_MAX_RETRIES, "2");
        env::set_var(ENV_DEAD_LETTER, " dead-letters ");

        let config = RunnerConfig::default().with_env();

        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.default_handler_timeout, Duration::from_millis(1500));
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.dead_letter_target.as_deref(), Some("dead-letters"));

        clear_env();
    }

    #[test]
    fn test_deserialize_resilience_sections() {
        let config: RunnerConfig = serde_json::from_str(
            r#"{"error_routing": {"enabled": true, "default_handler": "errors"},
                "circuit_breaker": {"enabled": true, "failure_threshold": 2}}"#,
        )
        .unwrap();

        assert!(config.error_routing.enabled);
        assert_eq!(config.error_routing.default_handler.as_deref(), Some("errors"));
        assert!(config.circuit_breaker.enabled);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_breaker_threshold() {
        let config = RunnerConfig::default()
            .with_circuit_breaker(CircuitBreakerConfig::enabled().with_failure_threshold(0));
        assert_eq!(config.validate().unwrap_err().code(), "SWY-050");

        let disabled = RunnerConfig::default().with_circuit_breaker(
            CircuitBreakerConfig::default().with_failure_threshold(0),
        );
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_error_handler() {
        let config = RunnerConfig::default().with_error_routing(ErrorRoutingConfig::to_handler(" "));
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_error_handler_enables_routing() {
        clear_env();
        env::set_var(ENV_ERROR_HANDLER, "triage");

        let config = RunnerConfig::default().with_env();
        assert!(config.error_routing.enabled);
        assert_eq!(config.error_routing.default_handler.as_deref(), Some("triage"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_garbage_is_ignored() {
        clear_env();
        env::set_var(ENV_MAX_HOPS, "lots");

        let config = RunnerConfig::default().with_max_hops(4).with_env();
        assert_eq!(config.max_hops, 4);

        clear_env();
    }
}
