//! Runtime Module - queue, lifecycle and the dispatch loop
//!
//! - `gate`: lifecycle state machine + queue producer side (`Emitter`)
//! - `dispatch`: per-event processing (hooks, routing, deadlines, follow-ups)
//! - `runner`: the public `Runner` tying orchestrator, callbacks and trace together

mod dispatch;
mod gate;
mod runner;

pub use gate::{Emitter, Lifecycle};
pub use runner::{Runner, ShutdownReport};
