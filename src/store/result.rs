//! Agent invocation results and per-event outcomes

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::state::State;
use crate::error::DispatchError;

/// Outcome of exactly one agent invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub agent_id: String,
    /// Handler output on success, the input state on failure
    pub output: State,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<DispatchError>,
}

impl AgentResult {
    /// Create a successful result
    pub fn success(
        agent_id: impl Into<String>,
        output: State,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            output,
            started_at,
            ended_at: ended_at(started_at, duration),
            duration,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failed(
        agent_id: impl Into<String>,
        state: State,
        error: DispatchError,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            output: state,
            started_at,
            ended_at: ended_at(started_at, duration),
            duration,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.error.as_ref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

fn ended_at(started_at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| started_at.checked_add_signed(d))
        .unwrap_or(started_at)
}

/// Everything that happened to one dequeued event
///
/// `results` is in plan order (registration or target-list order), never in
/// completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub event_id: Uuid,
    pub session_id: String,
    pub results: Vec<AgentResult>,
    /// Event-level failure (loop guard, aborted Before/AfterEventHandling)
    pub error: Option<DispatchError>,
}

impl DispatchOutcome {
    pub fn new(event_id: Uuid, session_id: impl Into<String>) -> Self {
        Self {
            event_id,
            session_id: session_id.into(),
            results: Vec::new(),
            error: None,
        }
    }

    pub fn rejected(event_id: Uuid, session_id: impl Into<String>, error: DispatchError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(event_id, session_id)
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.agent_id.as_str()).collect()
    }

    pub fn result_for(&self, agent_id: &str) -> Option<&AgentResult> {
        self.results.iter().find(|r| r.agent_id == agent_id)
    }

    /// True when the event completed without any event-level or agent error
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failed() == 0
    }
}
