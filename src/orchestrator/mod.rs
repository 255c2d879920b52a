//! Orchestrator Module - pluggable routing strategies
//!
//! An orchestrator owns the agent table and maps each event to a
//! `RoutePlan`; the runner executes the plan (hooks, deadlines, fan-out).
//!
//! Strategies:
//! - `DirectOrchestrator`: one agent from `route_to` metadata or the event target
//! - `CollaborativeOrchestrator`: concurrent fan-out to all agents or a `targets` subset
//! - `SequentialOrchestrator`: fixed pipeline, each agent gets the previous output
//! - `LoopOrchestrator`: one agent repeated until it signals completion
//! - `MixedOrchestrator`: concurrent fan-out, then a pipeline on the merged output

mod collaborative;
mod direct;
mod mixed;
mod repeat;
mod sequential;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::event::{Event, Fields};
use crate::handler::AgentHandler;

pub use collaborative::CollaborativeOrchestrator;
pub use direct::DirectOrchestrator;
pub use mixed::MixedOrchestrator;
pub use repeat::{LoopOrchestrator, LOOP_COMPLETED};
pub use sequential::SequentialOrchestrator;

/// Routing strategy, swappable at runner construction
pub trait Orchestrator: Send + Sync {
    /// Strategy name (for logs and traces)
    fn name(&self) -> &'static str;

    /// Add an agent; fails on a duplicate name
    fn register_agent(&self, name: &str, handler: Arc<dyn AgentHandler>) -> Result<()>;

    /// Remove an agent; returns false when it was not registered
    fn unregister_agent(&self, name: &str) -> bool;

    /// Registered agent names in registration order
    fn agent_names(&self) -> Vec<String>;

    /// Map an event to a dispatch plan
    fn route(&self, event: &Event) -> RoutePlan;
}

// ═══════════════════════════════════════════
// DISPATCH PLAN
// ═══════════════════════════════════════════

/// A resolved agent
#[derive(Clone)]
pub struct AgentTarget {
    pub name: String,
    pub handler: Arc<dyn AgentHandler>,
}

impl fmt::Debug for AgentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTarget").field("name", &self.name).finish()
    }
}

/// One position in a plan: a registered agent, or a name nobody registered
#[derive(Debug, Clone)]
pub enum Slot {
    Agent(AgentTarget),
    Missing(String),
}

impl Slot {
    pub fn name(&self) -> &str {
        match self {
            Slot::Agent(target) => &target.name,
            Slot::Missing(name) => name,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Slot::Missing(_))
    }
}

/// How the runner walks the slots of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// In order; each slot sees the previous slot's output, a failure stops the walk
    Sequential,
    /// All slots at once, each on its own copy of the state
    Concurrent,
    /// The single slot re-runs on its own output until it sets `until_key`
    /// to true or `max_iterations` is reached
    Repeat {
        max_iterations: u32,
        until_key: &'static str,
    },
    /// The first `concurrent` slots fan out; the rest run as a pipeline
    /// seeded with the merged successful fan-out outputs
    Mixed { concurrent: usize },
}

/// Dispatch plan returned by `Orchestrator::route`
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub mode: DispatchMode,
    pub slots: Vec<Slot>,
}

impl RoutePlan {
    pub fn single(slot: Slot) -> Self {
        Self {
            mode: DispatchMode::Sequential,
            slots: vec![slot],
        }
    }

    /// Plan for a name nobody registered
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::single(Slot::Missing(name.into()))
    }

    pub fn concurrent(slots: Vec<Slot>) -> Self {
        Self {
            mode: DispatchMode::Concurrent,
            slots,
        }
    }

    pub fn sequential(slots: Vec<Slot>) -> Self {
        Self {
            mode: DispatchMode::Sequential,
            slots,
        }
    }

    /// Concurrent phase followed by a sequential phase
    pub fn mixed(concurrent: Vec<Slot>, sequential: Vec<Slot>) -> Self {
        let split = concurrent.len();
        let mut slots = concurrent;
        slots.extend(sequential);
        Self {
            mode: DispatchMode::Mixed { concurrent: split },
            slots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(Slot::name).collect()
    }

    pub fn missing(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.is_missing())
            .map(Slot::name)
            .collect()
    }
}

// ═══════════════════════════════════════════
// AGENT TABLE
// ═══════════════════════════════════════════

/// Ordered, lock-guarded name → handler table shared by all strategies
#[derive(Default)]
pub struct AgentTable {
    agents: RwLock<Fields<Arc<dyn AgentHandler>>>,
}

impl AgentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn AgentHandler>) -> Result<()> {
        let mut agents = self.agents.write();
        if agents.contains_key(name) {
            return Err(DispatchError::DuplicateAgent {
                agent: name.to_string(),
            });
        }
        agents.insert(name, handler);
        debug!(agent = name, "Registered agent");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.agents.write().remove(name).is_some();
        if removed {
            debug!(agent = name, "Unregistered agent");
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.read().keys().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Look up one name
    pub fn resolve(&self, name: &str) -> Slot {
        match self.agents.read().get(name) {
            Some(handler) => Slot::Agent(AgentTarget {
                name: name.to_string(),
                handler: Arc::clone(handler),
            }),
            None => Slot::Missing(name.to_string()),
        }
    }

    /// Look up several names under one lock, keeping their order
    pub fn resolve_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Slot> {
        let agents = self.agents.read();
        names
            .into_iter()
            .map(|name| match agents.get(name) {
                Some(handler) => Slot::Agent(AgentTarget {
                    name: name.to_string(),
                    handler: Arc::clone(handler),
                }),
                None => Slot::Missing(name.to_string()),
            })
            .collect()
    }

    /// Every registered agent in registration order
    pub fn snapshot(&self) -> Vec<Slot> {
        self.agents
            .read()
            .iter()
            .map(|(name, handler)| {
                Slot::Agent(AgentTarget {
                    name: name.to_string(),
                    handler: Arc::clone(handler),
                })
            })
            .collect()
    }
}
