//! Hook points and the arguments handed to callbacks

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::event::Event;
use crate::store::{AgentResult, DispatchOutcome, State};

/// Named phase of event processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    BeforeEventHandling,
    BeforeAgentRun,
    AfterAgentRun,
    AgentError,
    AfterEventHandling,
    /// Wildcard: registered callbacks run at every phase
    All,
}

impl HookPoint {
    /// Concrete phases in dispatch order
    pub const PHASES: [HookPoint; 5] = [
        HookPoint::BeforeEventHandling,
        HookPoint::BeforeAgentRun,
        HookPoint::AfterAgentRun,
        HookPoint::AgentError,
        HookPoint::AfterEventHandling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeEventHandling => "before_event_handling",
            Self::BeforeAgentRun => "before_agent_run",
            Self::AfterAgentRun => "after_agent_run",
            Self::AgentError => "agent_error",
            Self::AfterEventHandling => "after_event_handling",
            Self::All => "all",
        }
    }

    /// Whether a callback registered at `self` runs when `phase` fires
    pub fn applies_to(self, phase: HookPoint) -> bool {
        self == HookPoint::All || self == phase
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for one callback call
///
/// Each callback receives its own copy; returning `Some(state)` replaces the
/// state seen by the next callback in the same invocation.
#[derive(Debug, Clone)]
pub struct CallbackArgs {
    pub token: CancellationToken,
    pub hook: HookPoint,
    pub event: Arc<Event>,
    pub state: State,
    /// Set for agent-level phases
    pub agent_id: Option<String>,
    /// Set for `AfterAgentRun` (and `AgentError` when the handler ran)
    pub result: Option<AgentResult>,
    /// Set for `AgentError`
    pub error: Option<DispatchError>,
    /// Set for `AfterEventHandling`
    pub outcome: Option<Arc<DispatchOutcome>>,
}

impl CallbackArgs {
    pub fn new(token: CancellationToken, hook: HookPoint, event: Arc<Event>, state: State) -> Self {
        Self {
            token,
            hook,
            event,
            state,
            agent_id: None,
            result: None,
            error: None,
            outcome: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_result(mut self, result: AgentResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: DispatchError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_outcome(mut self, outcome: Arc<DispatchOutcome>) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }
}
