//! Well-known metadata keys
//!
//! Metadata values are strings; counters and deadlines are parsed on read.

/// Explicit routing target, takes precedence over the event target
pub const ROUTE_TO: &str = "route_to";
/// Comma-separated subset of agents for collaborative routing
pub const TARGETS: &str = "targets";
/// Groups related events across hops
pub const SESSION_ID: &str = "session_id";
/// Number of chained re-emits that led to this event
pub const HOP_COUNT: &str = "hop_count";
/// Number of retry re-emits that led to this event
pub const RETRY_COUNT: &str = "retry_count";
/// Handler deadline in milliseconds
pub const TIMEOUT_MS: &str = "timeout_ms";
pub const PRIORITY: &str = "priority";
/// Set in an output state's metadata to chain into another agent
pub const NEXT_AGENT: &str = "next_agent";
/// Agent whose failure produced a dead-letter event
pub const FAILED_AGENT: &str = "failed_agent";
