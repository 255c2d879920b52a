//! Collaborative routing: concurrent fan-out

use std::sync::Arc;

use super::{AgentTable, Orchestrator, RoutePlan};
use crate::error::Result;
use crate::event::Event;
use crate::handler::AgentHandler;

/// Sends every event to all registered agents at once
///
/// A `targets` metadata list narrows the fan-out to the named agents, in
/// list order; names nobody registered are reported individually.
#[derive(Default)]
pub struct CollaborativeOrchestrator {
    agents: AgentTable,
}

impl CollaborativeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Orchestrator for CollaborativeOrchestrator {
    fn name(&self) -> &'static str {
        "collaborative"
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

    fn route(&self, event: &Event) -> RoutePlan {
        match event.target_list() {
            Some(names) => {
                let mut unique: Vec<&str> = Vec::with_capacity(names.len());
                for name in names {
                    if !unique.contains(&name) {
                        unique.push(name);
                    }
                }
                RoutePlan::concurrent(self.agents.resolve_all(unique))
            }
            None => RoutePlan::concurrent(self.agents.snapshot()),
        }
    }
}
