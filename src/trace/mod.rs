//! Trace Module - dispatch history per session
//!
//! Key types:
//! - `TraceEntry`: kind + session + event + optional agent + timestamp + data
//! - `TraceLogger`: pluggable append/query sink
//! - `InMemoryTraceLogger`: bounded per-session store (diagnostics, tests)
//! - `NoopTraceLogger`: discards everything

mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use memory::InMemoryTraceLogger;

/// Phase transition recorded in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    // ═══════════════════════════════════════════
    // EVENT LEVEL
    // ═══════════════════════════════════════════
    EventReceived,
    /// Loop guard rejected the event before routing
    EventRejected,
    /// A Before/AfterEventHandling callback failed
    EventAborted,
    RouteResolved,
    EventCompleted,
    /// Dropped from the queue when the drain timeout fired
    EventDiscarded,

    // ═══════════════════════════════════════════
    // AGENT LEVEL
    // ═══════════════════════════════════════════
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    /// An observer-phase callback failed; dispatch continued
    CallbackFailed,
    /// The agent's circuit breaker opened (or re-opened)
    CircuitOpened,

    // ═══════════════════════════════════════════
    // FOLLOW-UPS
    // ═══════════════════════════════════════════
    EventChained,
    RetryScheduled,
    DeadLettered,
    /// A failure was re-emitted to an error-handler agent
    ErrorRouted,
}

/// One append-only trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub session_id: String,
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl TraceEntry {
    pub fn new(kind: TraceKind, session_id: impl Into<String>, event_id: Uuid) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            event_id,
            agent_id: None,
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Pluggable sink for dispatch history
///
/// `append` is called from the dispatch loop and fan-out tasks; it must be
/// safe under concurrent callers and return quickly (buffer if the backing
/// store is slow). Failures are logged by the runner and never change a
/// dispatch outcome.
pub trait TraceLogger: Send + Sync {
    fn append(&self, entry: TraceEntry) -> anyhow::Result<()>;

    /// Entries recorded for `session_id`, in append order
    fn query(&self, session_id: &str) -> anyhow::Result<Vec<TraceEntry>>;
}

/// Sink that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceLogger;

impl NoopTraceLogger {
    pub fn new() -> Self {
        Self
    }
}

impl TraceLogger for NoopTraceLogger {
    fn append(&self, _entry: TraceEntry) -> anyhow::Result<()> {
        Ok(())
    }

    fn query(&self, _session_id: &str) -> anyhow::Result<Vec<TraceEntry>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn trace_logger_trait_is_object_safe() {
        fn accepts(_: &dyn TraceLogger) {}
        accepts(&NoopTraceLogger::new());
        accepts(&InMemoryTraceLogger::new());

        let shared: Arc<dyn TraceLogger> = Arc::new(InMemoryTraceLogger::new());
        assert!(shared.query("nobody").unwrap().is_empty());
    }

    #[test]
    fn noop_logger_records_nothing() {
        let logger = NoopTraceLogger::new();
        logger
            .append(TraceEntry::new(TraceKind::EventReceived, "s", Uuid::new_v4()))
            .unwrap();
        assert!(logger.query("s").unwrap().is_empty());
    }

    #[test]
    fn entry_serializes_snake_case_kind() {
        let entry = TraceEntry::new(TraceKind::AgentFailed, "s", Uuid::nil())
            .with_agent("a")
            .with_data(json!({"error": "boom"}));
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["kind"], "agent_failed");
        assert_eq!(value["agent_id"], "a");
        assert_eq!(value["data"]["error"], "boom");
    }
}
