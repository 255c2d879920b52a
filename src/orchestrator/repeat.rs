//! Loop routing: one agent, repeated

use std::sync::Arc;

use super::{AgentTable, DispatchMode, Orchestrator, RoutePlan};
use crate::error::Result;
use crate::event::Event;
use crate::handler::AgentHandler;

/// Output key an agent sets to `true` to end the loop early
pub const LOOP_COMPLETED: &str = "loop_completed";

/// Re-runs a single agent on its own output
///
/// Stops when the output state holds `loop_completed = true`, when
/// `max_iterations` runs have happened, or on the first failure.
pub struct LoopOrchestrator {
    agents: AgentTable,
    agent: String,
    max_iterations: u32,
}

impl LoopOrchestrator {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agents: AgentTable::new(),
            agent: agent.into(),
            max_iterations: 5,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

impl Orchestrator for LoopOrchestrator {
    fn name(&self) -> &'static str {
        "loop"
    }

    fn register_agent(&self, name: &str, handler: Arc<dyn AgentHandler>) -> Result<()> {
        self.agents.register(name, handler)
    }

    fn unregister_agent(&self, name: &str) -> bool {
        self.agents.unregister(name)
    }

    fn agent_names(&self) -> Vec<String> {
        self.agents.names()
    }

    fn route(&self, _event: &Event) -> RoutePlan {
        RoutePlan {
            mode: DispatchMode::Repeat {
                max_iterations: self.max_iterations,
                until_key: LOOP_COMPLETED,
            },
            slots: vec![self.agents.resolve(&self.agent)],
        }
    }
}
