//! Mock agent for testing
//!
//! Records every call and can sleep, fail, write output keys or request a
//! chained hop on demand. Essential for unit tests and integration tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::AgentHandler;
use crate::event::{keys, Event, Value};
use crate::store::State;

/// Mock agent with scripted behavior
#[derive(Clone)]
pub struct MockHandler {
    delay: Option<Duration>,
    /// Error message and how many leading calls fail (`None` = all)
    failure: Option<(String, Option<usize>)>,
    output: Vec<(String, Value)>,
    next_agent: Option<String>,
    /// Track all events received (for assertions)
    calls: Arc<Mutex<Vec<Arc<Event>>>>,
}

impl MockHandler {
    /// Create a mock that echoes the state back unchanged
    pub fn new() -> Self {
        Self {
            delay: None,
            failure: None,
            output: Vec::new(),
            next_agent: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before answering (returns early if the token is cancelled)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some((message.into(), None));
        self
    }

    /// Fail the first `times` calls, then succeed
    pub fn failing_times(mut self, times: usize, message: impl Into<String>) -> Self {
        self.failure = Some((message.into(), Some(times)));
        self
    }

    /// Write `key = value` into the output state
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.push((key.into(), value.into()));
        self
    }

    /// Ask the runner to chain the output into `agent`
    pub fn chaining_to(mut self, agent: impl Into<String>) -> Self {
        self.next_agent = Some(agent.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get all events this mock has received
    pub fn calls(&self) -> Vec<Arc<Event>> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<Arc<Event>> {
        self.calls.lock().last().cloned()
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHandler for MockHandler {
    async fn handle(
        &self,
        token: CancellationToken,
        event: Arc<Event>,
        state: State,
    ) -> anyhow::Result<State> {
        let call_number = {
            let mut calls = self.calls.lock();
            calls.push(event);
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => bail!("mock cancelled"),
            }
        }

        if let Some((message, limit)) = &self.failure {
            if limit.map_or(true, |n| call_number <= n) {
                bail!("{}", message);
            }
        }

        let mut out = state;
        for (key, value) in &self.output {
            out.set(key.as_str(), value.clone());
        }
        if let Some(next) = &self.next_agent {
            out.set_meta(keys::NEXT_AGENT, next.as_str());
        }
        Ok(out)
    }
}
