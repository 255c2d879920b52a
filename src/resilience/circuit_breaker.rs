//! Circuit Breaker Pattern
//!
//! Per-agent fail-fast guard. After `failure_threshold` consecutive handler
//! failures an agent's circuit opens and its invocations fail with
//! `CircuitOpen` without running the handler. Once `recovery_timeout` has
//! passed the circuit goes half-open and lets a limited number of trial
//! calls through; `success_threshold` successes close it again, any failure
//! re-opens it.
//!
//! # States
//!
//! - **Closed**: normal operation, calls go through
//! - **Open**: too many failures, calls fail immediately
//! - **HalfOpen**: testing recovery, at most `half_open_max_calls` in flight

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::duration_ms;
use crate::error::{DispatchError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Breakers are off unless explicitly enabled
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Successful trial calls needed to close from half-open
    pub success_threshold: u32,
    /// Time spent open before trial calls are allowed
    #[serde(with = "duration_ms", rename = "recovery_timeout_ms")]
    pub recovery_timeout: Duration,
    /// Trial calls allowed in flight while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Enabled config with defaults
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Set failure threshold before circuit opens
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set success threshold to close circuit from half-open
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set recovery timeout duration
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    in_flight: u32,
}

/// Circuit breaker for one agent
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
                in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving an expired open circuit to half-open first
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.check_recovery(&mut inner);
        inner.state
    }

    /// Consecutive failures seen while closed
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Ask permission for one call
    ///
    /// Every granted call must be settled with `record_success`,
    /// `record_failure` or `release`.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_recovery(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if inner.in_flight < self.config.half_open_max_calls => {
                inner.in_flight += 1;
                Ok(())
            }
            CircuitState::HalfOpen => Err(self.open_error(Duration::ZERO)),
            CircuitState::Open => {
                let remaining = inner
                    .opened_at
                    .map(|at| self.config.recovery_timeout.saturating_sub(at.elapsed()))
                    .unwrap_or(self.config.recovery_timeout);
                Err(self.open_error(remaining))
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.in_flight = inner.in_flight.saturating_sub(1);
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    info!(agent = %self.name, "Circuit closed");
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Count a failure; true when this failure opened the circuit
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures = inner.failures.saturating_add(1);
                if inner.failures >= self.config.failure_threshold {
                    warn!(agent = %self.name, failures = inner.failures, "Circuit opened");
                    self.transition(&mut inner, CircuitState::Open);
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                warn!(agent = %self.name, "Trial call failed, circuit re-opened");
                self.transition(&mut inner, CircuitState::Open);
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Settle a granted call without counting it either way (cancellation)
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn check_recovery(&self, inner: &mut Inner) {
        let expired = inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
        if inner.state == CircuitState::Open && expired {
            info!(agent = %self.name, "Circuit half-open, allowing trial calls");
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        inner.state = to;
        inner.successes = 0;
        inner.in_flight = 0;
        match to {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::HalfOpen => {}
        }
    }

    fn open_error(&self, retry_after: Duration) -> DispatchError {
        DispatchError::CircuitOpen {
            agent: self.name.clone(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }
}

/// Lazily created breaker per agent name
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Breaker for `agent`, or none when breakers are disabled
    pub fn for_agent(&self, agent: &str) -> Option<Arc<CircuitBreaker>> {
        if !self.config.enabled {
            return None;
        }
        if let Some(breaker) = self.breakers.get(agent) {
            return Some(Arc::clone(breaker.value()));
        }
        let breaker = self
            .breakers
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(agent, self.config.clone())));
        Some(Arc::clone(breaker.value()))
    }

    /// State of an agent's breaker, if one was ever used
    pub fn state(&self, agent: &str) -> Option<CircuitState> {
        self.breakers.get(agent).map(|breaker| breaker.state())
    }
}
