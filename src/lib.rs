//! Switchyard - in-process event dispatch between registered agents
//!
//! Events go into a bounded queue, one dispatch loop takes them in order,
//! an `Orchestrator` decides which agents receive each one, and callbacks
//! registered per `HookPoint` observe or rewrite state around every phase.

pub mod callback;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod orchestrator;
pub mod resilience;
pub mod runtime;
pub mod store;
pub mod trace;

pub use callback::{callback_fn, observer_fn, Callback, CallbackArgs, CallbackRegistry, HookPoint};
pub use config::RunnerConfig;
pub use error::{DispatchError, FixSuggestion, Result};
pub use event::{Event, EventData, Fields, Metadata, Value};
pub use handler::{handler_fn, AgentHandler, MockHandler};
pub use orchestrator::{
    CollaborativeOrchestrator, DirectOrchestrator, LoopOrchestrator, MixedOrchestrator,
    Orchestrator, SequentialOrchestrator,
};
pub use resilience::{
    CircuitBreakerConfig, CircuitState, ErrorCategory, ErrorRoutingConfig, RecoveryAction,
    RetryConfig, RetryPolicy, Severity,
};
pub use runtime::{Emitter, Lifecycle, Runner, ShutdownReport};
pub use store::{AgentResult, DispatchOutcome, State};
pub use trace::{InMemoryTraceLogger, NoopTraceLogger, TraceEntry, TraceKind, TraceLogger};

pub use tokio_util::sync::CancellationToken;
