//! Runner - owns the queue, the dispatch loop and the shared registries
//!
//! ```text
//! emit ──► Gate (bounded mpsc, try_send) ──► dispatch_loop ──► Dispatcher::process
//!                                                  ▲                 │
//!                                                  └── chain / retry / dead-letter
//! ```
//!
//! One loop task per runner; events are taken strictly in enqueue order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::dispatch::{dispatch_loop, Dispatcher, LoopExit};
use super::gate::{Emitter, Gate, Lifecycle, Queued};
use crate::callback::{Callback, CallbackRegistry, HookPoint};
use crate::config::RunnerConfig;
use crate::error::{DispatchError, Result};
use crate::event::Event;
use crate::handler::AgentHandler;
use crate::orchestrator::Orchestrator;
use crate::resilience::{CircuitBreakers, CircuitState, ErrorRouter, RetryPolicy};
use crate::store::State;
use crate::trace::{InMemoryTraceLogger, TraceEntry, TraceLogger};

/// What `stop()` observed while shutting the loop down
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    /// Events fully processed over the runner's lifetime
    pub processed: u64,
    /// Events still queued when the drain timeout fired
    pub discarded: Vec<Uuid>,
    /// True when the drain timeout fired and the loop was cancelled
    pub forced: bool,
    pub elapsed: Duration,
}

struct Worker {
    handle: JoinHandle<LoopExit>,
    token: CancellationToken,
}

/// Event-dispatch runtime
pub struct Runner {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<CallbackRegistry>,
    trace: Arc<dyn TraceLogger>,
    config: RunnerConfig,
    breakers: Arc<CircuitBreakers>,
    gate: Arc<Gate>,
    worker: Mutex<Option<Worker>>,
}

impl Runner {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            registry: Arc::new(CallbackRegistry::new()),
            trace: Arc::new(InMemoryTraceLogger::new()),
            config: RunnerConfig::default(),
            breakers: Arc::new(CircuitBreakers::default()),
            gate: Arc::new(Gate::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker.clone()));
        self.config = config;
        self
    }

    pub fn with_trace_logger(mut self, trace: Arc<dyn TraceLogger>) -> Self {
        self.trace = trace;
        self
    }

    /// Share a callback registry (e.g. across runners)
    pub fn with_registry(mut self, registry: Arc<CallbackRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.gate.lifecycle()
    }

    /// Circuit state of an agent that has been invoked with breakers enabled
    pub fn circuit_state(&self, agent: &str) -> Option<CircuitState> {
        self.breakers.state(agent)
    }

    // ═══════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════

    pub fn register_agent(&self, name: &str, handler: Arc<dyn AgentHandler>) -> Result<()> {
        self.orchestrator.register_agent(name, handler)
    }

    pub fn unregister_agent(&self, name: &str) -> bool {
        self.orchestrator.unregister_agent(name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.orchestrator.agent_names()
    }

    pub fn register_callback(
        &self,
        hook: HookPoint,
        name: impl Into<String>,
        callback: Arc<dyn Callback>,
    ) -> Result<()> {
        self.registry.register(hook, name, callback)
    }

    pub fn unregister_callback(&self, hook: HookPoint, name: &str) -> bool {
        self.registry.unregister(hook, name)
    }

    // ═══════════════════════════════════════════
    // EMIT
    // ═══════════════════════════════════════════

    /// Enqueue an event and return immediately
    ///
    /// Fails with `RunnerNotStarted` before `start`, `RunnerStopped` once
    /// `stop` began, and `QueueFull` when the bounded queue is saturated.
    pub fn emit(&self, event: Event) -> Result<()> {
        self.gate.push(Queued { event, seed: None })
    }

    /// Enqueue an event whose processing starts from `state`
    pub fn emit_with_state(&self, event: Event, state: State) -> Result<()> {
        self.gate.push(Queued {
            event,
            seed: Some(state),
        })
    }

    /// Cloneable emit handle for other tasks
    pub fn emitter(&self) -> Emitter {
        Emitter::new(Arc::clone(&self.gate))
    }

    pub fn dump_trace(&self, session_id: &str) -> anyhow::Result<Vec<TraceEntry>> {
        self.trace.query(session_id)
    }

    // ═══════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════

    /// `Created → Running`: spawn the dispatch loop on the current tokio runtime
    ///
    /// Cancelling `token` (or any parent of it) stops the loop; events still
    /// queued at that point are discarded and traced.
    pub fn start(&self, token: CancellationToken) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| DispatchError::SpawnFailed {
            reason: e.to_string(),
        })?;
        // Held until the worker is stored, so `stop` never sees an open gate without it
        let mut worker = self.worker.lock();
        if self.lifecycle() != Lifecycle::Created {
            return Err(DispatchError::RunnerAlreadyStarted);
        }
        self.config.validate()?;
        if let Some(limit) = self.config.callback_timeout {
            self.registry.set_timeout(Some(limit));
        }

        let queue = self.gate.open(self.config.queue_capacity)?;
        let token = token.child_token();
        let dispatcher = Arc::new(Dispatcher {
            orchestrator: Arc::clone(&self.orchestrator),
            registry: Arc::clone(&self.registry),
            trace: Arc::clone(&self.trace),
            config: self.config.clone(),
            retry: RetryPolicy::new(self.config.retry.clone()),
            breakers: Arc::clone(&self.breakers),
            errors: ErrorRouter::new(self.config.error_routing.clone()),
            gate: Arc::clone(&self.gate),
        });
        let handle = runtime.spawn(dispatch_loop(dispatcher, queue, token.clone()));
        *worker = Some(Worker { handle, token });
        drop(worker);

        info!(
            orchestrator = self.orchestrator.name(),
            queue_capacity = self.config.queue_capacity,
            max_hops = self.config.max_hops,
            "Runner started"
        );
        Ok(())
    }

    /// `Running → Draining → Stopped`
    ///
    /// New emits fail immediately. Already-queued events get `drain_timeout`
    /// to finish; after that the loop is cancelled (in-flight handlers see
    /// their token fire) and whatever is still queued is discarded and listed
    /// in the report.
    pub async fn stop(&self) -> Result<ShutdownReport> {
        if self.lifecycle() == Lifecycle::Created {
            return Err(DispatchError::RunnerNotStarted);
        }
        let Some(Worker { mut handle, token }) = self.worker.lock().take() else {
            return Err(DispatchError::RunnerStopped);
        };

        let clock = Instant::now();
        if self.gate.close() {
            info!(drain_timeout_ms = self.config.drain_timeout.as_millis() as u64, "Runner draining");
        }

        let drain = self.config.drain_timeout;
        let (exit, forced) = match tokio::time::timeout(drain, &mut handle).await {
            Ok(joined) => (loop_exit(joined, &self.gate), false),
            Err(_) => {
                warn!(drain_timeout_ms = drain.as_millis() as u64, "Drain timeout, cancelling dispatch loop");
                token.cancel();
                match tokio::time::timeout(drain, &mut handle).await {
                    Ok(joined) => (loop_exit(joined, &self.gate), true),
                    Err(_) => {
                        warn!("Dispatch loop ignored cancellation, aborting");
                        handle.abort();
                        self.gate.mark_stopped();
                        (LoopExit::default(), true)
                    }
                }
            }
        };
        // Pending retry timers belong to this loop
        token.cancel();

        let report = ShutdownReport {
            processed: exit.processed,
            discarded: exit.discarded,
            forced,
            elapsed: clock.elapsed(),
        };
        info!(
            processed = report.processed,
            discarded = report.discarded.len(),
            forced = report.forced,
            "Runner stopped"
        );
        Ok(report)
    }
}

fn loop_exit(joined: std::result::Result<LoopExit, tokio::task::JoinError>, gate: &Gate) -> LoopExit {
    joined.unwrap_or_else(|err| {
        warn!(error = %err, "Dispatch loop panicked");
        gate.mark_stopped();
        LoopExit::default()
    })
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use crate::handler::MockHandler;
    use crate::orchestrator::DirectOrchestrator;
    use pretty_assertions::assert_eq;

    fn runner() -> Runner {
        Runner::new(Arc::new(DirectOrchestrator::new())).with_config(RunnerConfig::testing())
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let runner = runner();
        let err = runner.start(CancellationToken::new()).unwrap_err();
        assert_eq!(err.code(), "SWY-024");
        assert_eq!(runner.lifecycle(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let runner = runner();
        runner.start(CancellationToken::new()).unwrap();
        assert_eq!(
            runner.start(CancellationToken::new()).unwrap_err(),
            DispatchError::RunnerAlreadyStarted
        );
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_and_twice() {
        let runner = runner();
        assert_eq!(runner.stop().await.unwrap_err(), DispatchError::RunnerNotStarted);

        runner.start(CancellationToken::new()).unwrap();
        let report = runner.stop().await.unwrap();
        assert!(!report.forced);
        assert_eq!(runner.lifecycle(), Lifecycle::Stopped);
        assert_eq!(runner.stop().await.unwrap_err(), DispatchError::RunnerStopped);
    }

    #[tokio::test]
    async fn test_invalid_config_keeps_runner_created() {
        let runner = Runner::new(Arc::new(DirectOrchestrator::new()))
            .with_config(RunnerConfig::default().with_queue_capacity(0));
        let err = runner.start(CancellationToken::new()).unwrap_err();
        assert_eq!(err.code(), "SWY-050");
        assert_eq!(runner.lifecycle(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn test_config_applies_callback_timeout() {
        let runner = runner();
        assert_eq!(runner.registry().timeout(), None);
        runner.start(CancellationToken::new()).unwrap();
        assert_eq!(runner.registry().timeout(), Some(Duration::from_secs(2)));
        runner.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_racing_start_never_orphans_loop() {
        for _ in 0..50 {
            let runner = Arc::new(runner());
            let starter = {
                let runner = Arc::clone(&runner);
                tokio::spawn(async move { runner.start(CancellationToken::new()) })
            };
            let stopped = runner.stop().await;
            let started = starter.await.unwrap();

            match (started, stopped) {
                (Ok(()), Ok(_)) => {}
                // stop ran before start opened the gate
                (Ok(()), Err(DispatchError::RunnerNotStarted)) => {
                    runner.stop().await.unwrap();
                }
                (started, stopped) => panic!("start={:?} stop={:?}", started, stopped),
            }
            assert_eq!(runner.lifecycle(), Lifecycle::Stopped);
        }
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_loop() {
        let runner = runner();
        runner.register_agent("a", Arc::new(MockHandler::new())).unwrap();
        let parent = CancellationToken::new();
        runner.start(parent.clone()).unwrap();

        parent.cancel();
        let report = runner.stop().await.unwrap();
        assert_eq!(runner.lifecycle(), Lifecycle::Stopped);
        assert!(!report.forced);
        assert_eq!(
            runner.emit(Event::new("a", EventData::new(), Default::default())).unwrap_err(),
            DispatchError::RunnerStopped
        );
    }
}
