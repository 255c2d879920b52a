//! Handler Module - agent abstraction
//!
//! An agent is any `AgentHandler`: given a cancellation token, the event and
//! the current state, it returns the output state or an error. The runtime
//! wraps every call into an `AgentResult` with timing, so handlers never
//! build results themselves.
//!
//! Handlers registered under a collaborative orchestrator run concurrently
//! and must be safe to invoke from several tasks at once.

mod mock;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::store::State;

pub use mock::MockHandler;

/// Domain logic invoked by the runner
///
/// Return a `DispatchError` (via `anyhow`) to keep a typed failure; any other
/// error is reported as `DispatchError::Handler`.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(
        &self,
        token: CancellationToken,
        event: Arc<Event>,
        state: State,
    ) -> anyhow::Result<State>;
}

/// Adapter for async closures
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> AgentHandler for FnHandler<F>
where
    F: Fn(CancellationToken, Arc<Event>, State) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<State>> + Send,
{
    async fn handle(
        &self,
        token: CancellationToken,
        event: Arc<Event>,
        state: State,
    ) -> anyhow::Result<State> {
        (self.0)(token, event, state).await
    }
}

/// Wrap an async closure as an agent handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn AgentHandler>
where
    F: Fn(CancellationToken, Arc<Event>, State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<State>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
