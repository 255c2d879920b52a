//! Sequential routing: fixed pipeline

use std::sync::Arc;

use super::{AgentTable, Orchestrator, RoutePlan};
use crate::error::Result;
use crate::event::Event;
use crate::handler::AgentHandler;

/// Runs agents one after another, each on the previous agent's output
///
/// The pipeline order is fixed at construction; agents in it that are not
/// registered are reported and skipped. A `route_to` value (set on retries)
/// runs that single agent instead of the whole pipeline.
pub struct SequentialOrchestrator {
    agents: AgentTable,
    order: Vec<String>,
}

impl SequentialOrchestrator {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: AgentTable::new(),
            order: order.into_iter().map(Into::into).collect(),
        }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }
}

impl Orchestrator for SequentialOrchestrator {
    fn name(&self) -> &'static str {
        "sequential"
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
        if let Some(name) = event.route_to() {
            return RoutePlan::single(self.agents.resolve(name));
        }
        RoutePlan::sequential(self.agents.resolve_all(self.order.iter().map(String::as_str)))
    }
}
