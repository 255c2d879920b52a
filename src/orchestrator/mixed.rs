//! Mixed routing: a concurrent phase followed by a pipeline

use std::sync::Arc;

use super::{AgentTable, Orchestrator, RoutePlan};
use crate::error::Result;
use crate::event::Event;
use crate::handler::AgentHandler;

/// Fans out to the collaborative agents, then runs the sequential agents
/// in order on the merged collaborative output
///
/// Successful collaborative outputs are merged in list order (later agents
/// win on key conflicts). The sequential phase is skipped only when every
/// collaborative agent failed. A `route_to` value runs that single agent.
pub struct MixedOrchestrator {
    agents: AgentTable,
    collaborative: Vec<String>,
    sequential: Vec<String>,
}

impl MixedOrchestrator {
    pub fn new<C, S>(collaborative: C, sequential: S) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in collaborative.into_iter().map(Into::into) {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self {
            agents: AgentTable::new(),
            collaborative: unique,
            sequential: sequential.into_iter().map(Into::into).collect(),
        }
    }

    pub fn collaborative(&self) -> &[String] {
        &self.collaborative
    }

    pub fn sequential(&self) -> &[String] {
        &self.sequential
    }
}

impl Orchestrator for MixedOrchestrator {
    fn name(&self) -> &'static str {
        "mixed"
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
        let concurrent = self
            .agents
            .resolve_all(self.collaborative.iter().map(String::as_str));
        let sequential = self
            .agents
            .resolve_all(self.sequential.iter().map(String::as_str));
        RoutePlan::mixed(concurrent, sequential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{keys, EventData};
    use crate::handler::MockHandler;
    use crate::orchestrator::DispatchMode;

    fn orchestrator() -> MixedOrchestrator {
        let orch = MixedOrchestrator::new(["research", "draft", "research"], ["edit", "publish"]);
        for name in ["publish", "research", "draft", "edit"] {
            orch.register_agent(name, Arc::new(MockHandler::new())).unwrap();
        }
        orch
    }

    #[test]
    fn test_plan_has_concurrent_phase_then_pipeline() {
        let plan = orchestrator().route(&Event::broadcast(EventData::new()));
        assert_eq!(plan.mode, DispatchMode::Mixed { concurrent: 2 });
        assert_eq!(plan.names(), vec!["research", "draft", "edit", "publish"]);
    }

    #[test]
    fn test_unregistered_names_reported() {
        let orch = MixedOrchestrator::new(["a", "ghost"], ["b"]);
        orch.register_agent("a", Arc::new(MockHandler::new())).unwrap();

        let plan = orch.route(&Event::broadcast(EventData::new()));
        assert_eq!(plan.missing(), vec!["ghost", "b"]);
    }

    #[test]
    fn test_route_to_runs_single_agent() {
        let event = Event::broadcast(EventData::new()).with_meta(keys::ROUTE_TO, "edit");
        let plan = orchestrator().route(&event);
        assert_eq!(plan.mode, DispatchMode::Sequential);
        assert_eq!(plan.names(), vec!["edit"]);
    }
}
