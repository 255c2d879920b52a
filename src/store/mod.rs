//! Store Module - working state and invocation results
//!
//! Key types:
//! - `State`: mutable, deep-cloneable key/value store with a metadata namespace
//! - `AgentResult`: output state + timing + optional error for one invocation
//! - `DispatchOutcome`: per-event aggregate of agent results

mod result;
mod state;

// Re-export all public types
pub use result::{AgentResult, DispatchOutcome};
pub use state::State;
