//! Direct routing: exactly one agent per event

use std::sync::Arc;

use super::{AgentTable, Orchestrator, RoutePlan};
use crate::error::Result;
use crate::event::Event;
use crate::handler::AgentHandler;

/// Routes to the agent named by `route_to` metadata, else the event target
///
/// An unregistered (or empty) name yields a not-found plan, which the
/// runner reports through the `AgentError` hook.
#[derive(Default)]
pub struct DirectOrchestrator {
    agents: AgentTable,
}

impl DirectOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Orchestrator for DirectOrchestrator {
    fn name(&self) -> &'static str {
        "direct"
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
        let name = event.route_to().unwrap_or_else(|| event.target());
        RoutePlan::single(self.agents.resolve(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{keys, EventData, Metadata};
    use crate::handler::MockHandler;
    use crate::orchestrator::{DispatchMode, Slot};

    fn orchestrator() -> DirectOrchestrator {
        let orch = DirectOrchestrator::new();
        orch.register_agent("A", Arc::new(MockHandler::new())).unwrap();
        orch.register_agent("B", Arc::new(MockHandler::new())).unwrap();
        orch
    }

    #[test]
    fn test_routes_by_target() {
        let plan = orchestrator().route(&Event::new("A", EventData::new(), Metadata::new()));
        assert_eq!(plan.mode, DispatchMode::Sequential);
        assert_eq!(plan.names(), vec!["A"]);
        assert!(matches!(plan.slots[0], Slot::Agent(_)));
    }

    #[test]
    fn test_route_to_metadata_wins() {
        let event = Event::new("A", EventData::new(), Metadata::new()).with_meta(keys::ROUTE_TO, "B");
        assert_eq!(orchestrator().route(&event).names(), vec!["B"]);
    }

    #[test]
    fn test_unknown_target_is_not_found() {
        let plan = orchestrator().route(&Event::new("Z", EventData::new(), Metadata::new()));
        assert_eq!(plan.missing(), vec!["Z"]);
    }

    #[test]
    fn test_broadcast_event_has_no_direct_target() {
        let plan = orchestrator().route(&Event::broadcast(EventData::new()));
        assert_eq!(plan.missing(), vec![""]);
    }
}
