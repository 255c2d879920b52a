//! Error types with fix suggestions
//!
//! Every variant carries a stable code (`SWY-xxx`) so callbacks and trace
//! consumers can match on it without parsing messages.
//!
//! Handlers and callbacks return `anyhow::Result`; a `DispatchError` inside
//! the `anyhow::Error` survives the trip (see [`DispatchError::from_agent_failure`]).

use thiserror::Error;

use crate::callback::HookPoint;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// All dispatch errors (cloneable so they can ride along in callback args)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    // ═══════════════════════════════════════════
    // ROUTING ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[SWY-001] Agent '{agent}' not found")]
    AgentNotFound { agent: String },

    #[error("[SWY-002] Agent '{agent}' is already registered")]
    DuplicateAgent { agent: String },

    // ═══════════════════════════════════════════
    // CALLBACK ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[SWY-010] Callback '{name}' is already registered for {hook}")]
    DuplicateCallbackName { hook: HookPoint, name: String },

    #[error("[SWY-011] Callback '{name}' aborted {hook}: {reason}")]
    CallbackAborted {
        hook: HookPoint,
        name: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // LIFECYCLE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[SWY-020] Runner has not been started")]
    RunnerNotStarted,

    #[error("[SWY-021] Runner is already started")]
    RunnerAlreadyStarted,

    #[error("[SWY-022] Runner is stopped or draining")]
    RunnerStopped,

    #[error("[SWY-023] Event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("[SWY-024] Failed to start dispatch loop: {reason}")]
    SpawnFailed { reason: String },

    // ═══════════════════════════════════════════
    // EXECUTION ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[SWY-030] Agent '{agent}' timed out after {timeout_ms}ms")]
    HandlerTimeout { agent: String, timeout_ms: u64 },

    #[error("[SWY-031] Agent '{agent}' failed: {message}")]
    Handler { agent: String, message: String },

    #[error("[SWY-032] Agent '{agent}' cancelled")]
    Cancelled { agent: String },

    // ═══════════════════════════════════════════
    // GUARD ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[SWY-040] Loop detected: hop count {hops} exceeds maximum {max}")]
    LoopDetected { hops: u32, max: u32 },

    #[error("[SWY-041] Agent '{agent}' failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        agent: String,
        attempts: u32,
        last_error: String,
    },

    #[error("[SWY-042] Circuit open for agent '{agent}' (retry in {retry_after_ms}ms)")]
    CircuitOpen { agent: String, retry_after_ms: u64 },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[SWY-050] Invalid runner config: {reason}")]
    InvalidConfig { reason: String },
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound { .. } => "SWY-001",
            Self::DuplicateAgent { .. } => "SWY-002",
            Self::DuplicateCallbackName { .. } => "SWY-010",
            Self::CallbackAborted { .. } => "SWY-011",
            Self::RunnerNotStarted => "SWY-020",
            Self::RunnerAlreadyStarted => "SWY-021",
            Self::RunnerStopped => "SWY-022",
            Self::QueueFull { .. } => "SWY-023",
            Self::SpawnFailed { .. } => "SWY-024",
            Self::HandlerTimeout { .. } => "SWY-030",
            Self::Handler { .. } => "SWY-031",
            Self::Cancelled { .. } => "SWY-032",
            Self::LoopDetected { .. } => "SWY-040",
            Self::MaxRetriesExceeded { .. } => "SWY-041",
            Self::CircuitOpen { .. } => "SWY-042",
            Self::InvalidConfig { .. } => "SWY-050",
        }
    }

    /// Transient failures worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HandlerTimeout { .. } | Self::Handler { .. } | Self::QueueFull { .. }
        )
    }

    /// Lifecycle misuse, the only class surfaced synchronously to callers
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::RunnerNotStarted
                | Self::RunnerAlreadyStarted
                | Self::RunnerStopped
                | Self::QueueFull { .. }
                | Self::SpawnFailed { .. }
        )
    }

    /// Turn a handler failure into a typed error
    ///
    /// A `DispatchError` anywhere in the chain is kept as-is; anything else
    /// becomes `Handler` with the full context chain as message.
    pub fn from_agent_failure(agent: &str, err: anyhow::Error) -> Self {
        match err.downcast_ref::<DispatchError>() {
            Some(typed) => typed.clone(),
            None => Self::Handler {
                agent: agent.to_string(),
                message: format!("{:#}", err),
            },
        }
    }

    /// Agent identifier carried by the error, when it names one
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentNotFound { agent }
            | Self::DuplicateAgent { agent }
            | Self::HandlerTimeout { agent, .. }
            | Self::Handler { agent, .. }
            | Self::Cancelled { agent }
            | Self::MaxRetriesExceeded { agent, .. }
            | Self::CircuitOpen { agent, .. } => Some(agent),
            _ => None,
        }
    }
}

impl FixSuggestion for DispatchError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            DispatchError::AgentNotFound { .. } => {
                Some("Register the agent before emitting, or check the target / route_to value")
            }
            DispatchError::DuplicateAgent { .. } => {
                Some("Use a unique agent name or unregister the existing one first")
            }
            DispatchError::DuplicateCallbackName { .. } => {
                Some("Use a unique callback name per hook, or unregister the existing one first")
            }
            DispatchError::CallbackAborted { .. } => Some("Check the callback's error condition"),
            DispatchError::RunnerNotStarted => Some("Call Runner::start before emitting events"),
            DispatchError::RunnerAlreadyStarted => Some("Start each runner only once"),
            DispatchError::RunnerStopped => Some("Create a new runner; a stopped runner cannot restart"),
            DispatchError::QueueFull { .. } => {
                Some("Increase queue_capacity or slow down producers")
            }
            DispatchError::SpawnFailed { .. } => Some("Call Runner::start from inside a tokio runtime"),
            DispatchError::HandlerTimeout { .. } => {
                Some("Increase timeout_ms / default_handler_timeout or make the handler observe cancellation")
            }
            DispatchError::Handler { .. } => None,
            DispatchError::Cancelled { .. } => None,
            DispatchError::LoopDetected { .. } => {
                Some("Break the agent cycle or raise max_hops if the chain is intentional")
            }
            DispatchError::MaxRetriesExceeded { .. } => {
                Some("Inspect the dead-letter target for the failed event")
            }
            DispatchError::CircuitOpen { .. } => {
                Some("Wait for the recovery timeout or fix the agent's downstream dependency")
            }
            DispatchError::InvalidConfig { .. } => Some("Fix the runner configuration values"),
        }
    }
}
