//! Resilience Module - failure handling around agent invocations
//!
//! - `RetryConfig` / `RetryPolicy`: backoff parameters and retry / dead-letter decisions
//! - `CircuitBreaker`: per-agent fail-fast after repeated failures
//! - `ErrorRouter`: classifies failures and picks the error-handler agent

mod circuit_breaker;
mod error_routing;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakers, CircuitState};
pub use error_routing::{
    ErrorCategory, ErrorRoute, ErrorRouter, ErrorRoutingConfig, RecoveryAction, Severity,
};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
