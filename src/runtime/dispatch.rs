//! Per-event dispatch: hooks, routing, deadlines, fan-out and follow-ups
//!
//! Phases for one dequeued event:
//! 1. session fallback + loop guard
//! 2. `BeforeEventHandling` (failure aborts the event)
//! 3. `Orchestrator::route`
//! 4. per slot: `BeforeAgentRun` → circuit check → handler (deadline, panic
//!    isolation) → `AfterAgentRun` | `AgentError`
//! 5. follow-ups: chained hop, retry or dead-letter, error routing
//! 6. `AfterEventHandling`
//!
//! Every phase appends a trace entry; trace failures are logged and ignored.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use super::gate::{Gate, Queued};
use crate::callback::{CallbackArgs, CallbackRegistry, HookPoint};
use crate::config::RunnerConfig;
use crate::error::DispatchError;
use crate::event::{keys, Event, EventData, Metadata, Value};
use crate::orchestrator::{AgentTarget, DispatchMode, Orchestrator, Slot};
use crate::resilience::{CircuitBreaker, CircuitBreakers, ErrorRouter, RetryDecision, RetryPolicy};
use crate::store::{AgentResult, DispatchOutcome, State};
use crate::trace::{TraceEntry, TraceKind, TraceLogger};

/// What the dispatch loop did before it exited
#[derive(Debug, Default)]
pub(crate) struct LoopExit {
    pub processed: u64,
    pub discarded: Vec<Uuid>,
}

/// Everything the dispatch loop and its fan-out tasks share
pub(crate) struct Dispatcher {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub registry: Arc<CallbackRegistry>,
    pub trace: Arc<dyn TraceLogger>,
    pub config: RunnerConfig,
    pub retry: RetryPolicy,
    pub breakers: Arc<CircuitBreakers>,
    pub errors: ErrorRouter,
    pub gate: Arc<Gate>,
}

/// Single consumer: one event fully processed before the next is taken
pub(crate) async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    mut queue: mpsc::Receiver<Queued>,
    token: CancellationToken,
) -> LoopExit {
    info!(orchestrator = dispatcher.orchestrator.name(), "Dispatch loop started");
    let mut exit = LoopExit::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            queued = queue.recv() => queued,
        };
        let Some(queued) = next else {
            break;
        };
        let event_id = queued.event.id();
        // Handler panics are caught per agent; this keeps the loop alive for anything else
        let processed = AssertUnwindSafe(dispatcher.process(queued, &token))
            .catch_unwind()
            .await;
        if let Err(panic) = processed {
            error!(event_id = %event_id, panic = panic_message(panic.as_ref()), "Event processing panicked");
        }
        exit.processed += 1;
    }

    // Whatever is still queued (forced stop or external cancellation) is reported, not dropped
    queue.close();
    while let Ok(queued) = queue.try_recv() {
        dispatcher.discard(&queued.event);
        exit.discarded.push(queued.event.id());
    }
    dispatcher.gate.mark_stopped();

    info!(
        processed = exit.processed,
        discarded = exit.discarded.len(),
        "Dispatch loop stopped"
    );
    exit
}

impl Dispatcher {
    // ═══════════════════════════════════════════
    // EVENT LEVEL
    // ═══════════════════════════════════════════

    #[instrument(
        name = "dispatch",
        skip_all,
        fields(event_id = %queued.event.id(), to = %queued.event.target(), session_id)
    )]
    pub async fn process(
        self: &Arc<Self>,
        queued: Queued,
        token: &CancellationToken,
    ) -> DispatchOutcome {
        let Queued { mut event, seed } = queued;

        if event.session_id().is_none() {
            debug!("Event has no session id, using event id");
            event.set_session(event.id().to_string());
        }
        let session = event.session_id().unwrap_or_default().to_string();
        Span::current().record("session_id", session.as_str());

        // Cancelled when this event is done, so nothing it started outlives it
        let event_token = token.child_token();
        let _event_guard = event_token.clone().drop_guard();

        let event = Arc::new(event);
        self.record(
            TraceKind::EventReceived,
            &session,
            &event,
            None,
            json!({
                "target": event.target(),
                "source": event.source(),
                "hop_count": event.hop_count(),
                "retry_count": event.retry_count(),
            }),
        );

        let mut state = seed.unwrap_or_default();

        // Loop guard
        let hops = event.hop_count();
        if hops > self.config.max_hops {
            let err = DispatchError::LoopDetected {
                hops,
                max: self.config.max_hops,
            };
            warn!(hops, max = self.config.max_hops, "Rejected event: loop detected");
            self.record(
                TraceKind::EventRejected,
                &session,
                &event,
                None,
                error_data(&err),
            );
            let args = CallbackArgs::new(event_token.clone(), HookPoint::AgentError, Arc::clone(&event), state)
                .with_error(err.clone());
            self.invoke_best_effort(HookPoint::AgentError, args, &session, &event)
                .await;
            return DispatchOutcome::rejected(event.id(), session, err);
        }

        // Phase 1: BeforeEventHandling
        let args = CallbackArgs::new(
            event_token.clone(),
            HookPoint::BeforeEventHandling,
            Arc::clone(&event),
            state,
        );
        state = match self.registry.invoke(HookPoint::BeforeEventHandling, args).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "BeforeEventHandling aborted event");
                self.record(
                    TraceKind::EventAborted,
                    &session,
                    &event,
                    None,
                    hook_error_data(HookPoint::BeforeEventHandling, &err),
                );
                return DispatchOutcome::rejected(event.id(), session, err);
            }
        };

        // Phase 2: route
        let plan = self.orchestrator.route(&event);
        debug!(mode = ?plan.mode, agents = ?plan.names(), "Route resolved");
        self.record(
            TraceKind::RouteResolved,
            &session,
            &event,
            None,
            json!({
                "orchestrator": self.orchestrator.name(),
                "mode": mode_name(plan.mode),
                "agents": plan.names(),
            }),
        );

        // Phase 3: agents
        let mode = plan.mode;
        let (results, final_state) = match mode {
            DispatchMode::Concurrent => {
                let results = self
                    .run_concurrent(plan.slots, &event, &session, &state, &event_token)
                    .await;
                (results, state)
            }
            DispatchMode::Sequential => {
                self.run_sequential(plan.slots, &event, &session, state, &event_token)
                    .await
            }
            DispatchMode::Repeat {
                max_iterations,
                until_key,
            } => {
                self.run_repeat(
                    plan.slots,
                    max_iterations,
                    until_key,
                    &event,
                    &session,
                    state,
                    &event_token,
                )
                .await
            }
            DispatchMode::Mixed { concurrent } => {
                self.run_mixed(plan.slots, concurrent, &event, &session, state, &event_token)
                    .await
            }
        };

        let mut outcome = DispatchOutcome::new(event.id(), session.clone());
        outcome.results = results;

        // Follow-ups re-emit through the queue
        self.follow_up(&event, &session, mode, &outcome.results, token)
            .await;

        // Phase 4: AfterEventHandling
        let shared = Arc::new(outcome);
        let args = CallbackArgs::new(
            event_token.clone(),
            HookPoint::AfterEventHandling,
            Arc::clone(&event),
            final_state,
        )
        .with_outcome(Arc::clone(&shared));
        let after = self.registry.invoke(HookPoint::AfterEventHandling, args).await;
        let mut outcome = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
        if let Err(err) = after {
            warn!(error = %err, "AfterEventHandling failed");
            self.record(
                TraceKind::EventAborted,
                &session,
                &event,
                None,
                hook_error_data(HookPoint::AfterEventHandling, &err),
            );
            outcome.error = Some(err);
        }

        debug!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Event processed"
        );
        self.record(
            TraceKind::EventCompleted,
            &session,
            &event,
            None,
            json!({
                "agents": outcome.agent_ids(),
                "succeeded": outcome.succeeded(),
                "failed": outcome.failed(),
            }),
        );
        outcome
    }

    /// Report an event that was still queued when the loop exited
    pub fn discard(&self, event: &Event) {
        let session = event
            .session_id()
            .map(str::to_string)
            .unwrap_or_else(|| event.id().to_string());
        warn!(event_id = %event.id(), session_id = %session, to = event.target(), "Discarded queued event on shutdown");
        self.record(
            TraceKind::EventDiscarded,
            &session,
            event,
            None,
            json!({ "target": event.target() }),
        );
    }

    // ═══════════════════════════════════════════
    // PLAN EXECUTION
    // ═══════════════════════════════════════════

    /// Fan-out: one task per slot, each on its own state copy; results in slot order
    async fn run_concurrent(
        self: &Arc<Self>,
        slots: Vec<Slot>,
        event: &Arc<Event>,
        session: &str,
        state: &State,
        token: &CancellationToken,
    ) -> Vec<AgentResult> {
        let names: Vec<String> = slots.iter().map(|s| s.name().to_string()).collect();

        let handles: Vec<_> = slots
            .into_iter()
            .map(|slot| {
                let this = Arc::clone(self);
                let event = Arc::clone(event);
                let session = session.to_string();
                let state = state.clone();
                let token = token.clone();
                tokio::spawn(
                    async move { this.run_slot(slot, &event, &session, state, &token).await }
                        .instrument(Span::current()),
                )
            })
            .collect();

        // join_all keeps input order regardless of completion order
        let joined = futures::future::join_all(handles).await;
        let mut results = Vec::with_capacity(joined.len());
        for (joined, name) in joined.into_iter().zip(names) {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    let err = DispatchError::Handler {
                        agent: name.clone(),
                        message: format!("agent task panicked: {}", join_err),
                    };
                    self.fail_agent(&name, event, session, state.clone(), err, None, token)
                        .await
                }
            };
            results.push(result);
        }
        results
    }

    /// Pipeline: each slot gets the previous output; missing slots are skipped,
    /// a failing agent stops the walk
    async fn run_sequential(
        self: &Arc<Self>,
        slots: Vec<Slot>,
        event: &Arc<Event>,
        session: &str,
        state: State,
        token: &CancellationToken,
    ) -> (Vec<AgentResult>, State) {
        let mut current = state;
        let mut results = Vec::with_capacity(slots.len());

        for slot in slots {
            let missing = slot.is_missing();
            let result = self
                .run_slot(slot, event, session, current.clone(), token)
                .await;
            let succeeded = result.is_success();
            if succeeded {
                current = result.output.clone();
                // a hop request only counts from the final output
                current.remove_meta(keys::NEXT_AGENT);
            }
            results.push(result);
            if !succeeded && !missing {
                break;
            }
        }

        (results, current)
    }

    /// One agent re-run on its own output until `until_key` is true
    #[allow(clippy::too_many_arguments)]
    async fn run_repeat(
        self: &Arc<Self>,
        slots: Vec<Slot>,
        max_iterations: u32,
        until_key: &str,
        event: &Arc<Event>,
        session: &str,
        state: State,
        token: &CancellationToken,
    ) -> (Vec<AgentResult>, State) {
        let Some(slot) = slots.into_iter().next() else {
            return (Vec::new(), state);
        };
        let target = match slot {
            Slot::Agent(target) => target,
            missing @ Slot::Missing(_) => {
                let result = self.run_slot(missing, event, session, state.clone(), token).await;
                return (vec![result], state);
            }
        };

        let mut current = state;
        let mut results = Vec::new();
        for iteration in 1..=max_iterations {
            let result = self
                .run_agent(target.clone(), event, session, current.clone(), token)
                .await;
            let succeeded = result.is_success();
            let done = succeeded && result.output.get(until_key).and_then(Value::as_bool) == Some(true);
            if succeeded {
                current = result.output.clone();
                // a hop request only counts from the final output
                current.remove_meta(keys::NEXT_AGENT);
            }
            results.push(result);
            if !succeeded {
                break;
            }
            if done {
                debug!(agent = %target.name, iteration, "Loop agent signalled completion");
                break;
            }
        }

        (results, current)
    }

    /// Fan-out phase, then a pipeline seeded with the merged successful outputs
    async fn run_mixed(
        self: &Arc<Self>,
        mut slots: Vec<Slot>,
        concurrent: usize,
        event: &Arc<Event>,
        session: &str,
        state: State,
        token: &CancellationToken,
    ) -> (Vec<AgentResult>, State) {
        let pipeline = slots.split_off(concurrent.min(slots.len()));
        let mut merged = state;
        let mut results = Vec::with_capacity(slots.len() + pipeline.len());

        if !slots.is_empty() {
            let fan_out = self
                .run_concurrent(slots, event, session, &merged, token)
                .await;
            let mut any_success = false;
            for result in fan_out.iter().filter(|r| r.is_success()) {
                merged.merge(&result.output);
                any_success = true;
            }
            results.extend(fan_out);
            if !any_success {
                debug!("Every collaborative agent failed, pipeline skipped");
                return (results, merged);
            }
            if !pipeline.is_empty() {
                // a hop request only counts from the final output
                merged.remove_meta(keys::NEXT_AGENT);
            }
        }

        let (piped, final_state) = self
            .run_sequential(pipeline, event, session, merged, token)
            .await;
        results.extend(piped);
        (results, final_state)
    }

    async fn run_slot(
        self: &Arc<Self>,
        slot: Slot,
        event: &Arc<Event>,
        session: &str,
        state: State,
        token: &CancellationToken,
    ) -> AgentResult {
        match slot {
            Slot::Agent(target) => self.run_agent(target, event, session, state, token).await,
            Slot::Missing(name) => {
                let err = DispatchError::AgentNotFound {
                    agent: name.clone(),
                };
                warn!(agent = %name, "No agent registered for target");
                self.fail_agent(&name, event, session, state, err, None, token)
                    .await
            }
        }
    }

    // ═══════════════════════════════════════════
    // AGENT LEVEL
    // ═══════════════════════════════════════════

    #[instrument(skip_all, fields(agent = %target.name))]
    async fn run_agent(
        &self,
        target: AgentTarget,
        event: &Arc<Event>,
        session: &str,
        state: State,
        token: &CancellationToken,
    ) -> AgentResult {
        let agent = target.name.as_str();

        let args = CallbackArgs::new(
            token.clone(),
            HookPoint::BeforeAgentRun,
            Arc::clone(event),
            state.clone(),
        )
        .with_agent(agent);
        let state = match self.registry.invoke(HookPoint::BeforeAgentRun, args).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "BeforeAgentRun failed, handler skipped");
                return self
                    .fail_agent(agent, event, session, state, err, None, token)
                    .await;
            }
        };

        let breaker = self.breakers.for_agent(agent);
        if let Some(err) = breaker.as_ref().and_then(|b| b.try_acquire().err()) {
            debug!("Circuit open, handler skipped");
            return self
                .fail_agent(agent, event, session, state, err, None, token)
                .await;
        }

        let deadline = event
            .timeout()
            .unwrap_or(self.config.default_handler_timeout);
        let started_at = Utc::now();
        let clock = Instant::now();
        self.record(
            TraceKind::AgentStarted,
            session,
            event,
            Some(agent),
            json!({ "timeout_ms": deadline.as_millis() as u64 }),
        );

        let call = AssertUnwindSafe(target.handler.handle(
            token.child_token(),
            Arc::clone(event),
            state.clone(),
        ))
        .catch_unwind();
        let outcome = tokio::select! {
            res = tokio::time::timeout(deadline, call) => match res {
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(err))) => Err(DispatchError::from_agent_failure(agent, err)),
                Ok(Err(panic)) => Err(DispatchError::Handler {
                    agent: agent.to_string(),
                    message: format!("panicked: {}", panic_message(panic.as_ref())),
                }),
                Err(_) => Err(DispatchError::HandlerTimeout {
                    agent: agent.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                }),
            },
            _ = token.cancelled() => Err(DispatchError::Cancelled { agent: agent.to_string() }),
        };
        let elapsed = clock.elapsed();
        if let Some(breaker) = &breaker {
            self.settle_breaker(breaker, &outcome, session, event);
        }

        match outcome {
            Ok(output) => {
                let mut result = AgentResult::success(agent, output.clone(), started_at, elapsed);
                debug!(duration_ms = result.duration_ms(), "Agent completed");
                self.record(
                    TraceKind::AgentCompleted,
                    session,
                    event,
                    Some(agent),
                    json!({
                        "duration_ms": result.duration_ms(),
                        "output": output.to_json(),
                    }),
                );

                let args = CallbackArgs::new(
                    token.clone(),
                    HookPoint::AfterAgentRun,
                    Arc::clone(event),
                    output,
                )
                .with_agent(agent)
                .with_result(result.clone());
                match self.registry.invoke(HookPoint::AfterAgentRun, args).await {
                    Ok(final_output) => result.output = final_output,
                    Err(err) => self.callback_failed(HookPoint::AfterAgentRun, &err, session, event),
                }
                result
            }
            Err(err) => {
                let result = AgentResult::failed(agent, state.clone(), err.clone(), started_at, elapsed);
                self.fail_agent(agent, event, session, state, err, Some(result), token)
                    .await
            }
        }
    }

    /// Route a failure through `AgentError` and build the failed result
    #[allow(clippy::too_many_arguments)]
    async fn fail_agent(
        &self,
        agent: &str,
        event: &Arc<Event>,
        session: &str,
        state: State,
        err: DispatchError,
        result: Option<AgentResult>,
        token: &CancellationToken,
    ) -> AgentResult {
        let result = result.unwrap_or_else(|| {
            AgentResult::failed(agent, state.clone(), err.clone(), Utc::now(), Duration::ZERO)
        });
        warn!(agent, error = %err, duration_ms = result.duration_ms(), "Agent failed");
        self.record(
            TraceKind::AgentFailed,
            session,
            event,
            Some(agent),
            error_data(&err),
        );

        let args = CallbackArgs::new(token.clone(), HookPoint::AgentError, Arc::clone(event), state)
            .with_agent(agent)
            .with_error(err)
            .with_result(result.clone());
        self.invoke_best_effort(HookPoint::AgentError, args, session, event)
            .await;
        result
    }

    // ═══════════════════════════════════════════
    // FOLLOW-UPS (chain, retry, dead-letter, error routing)
    // ═══════════════════════════════════════════

    async fn follow_up(
        self: &Arc<Self>,
        event: &Arc<Event>,
        session: &str,
        mode: DispatchMode,
        results: &[AgentResult],
        token: &CancellationToken,
    ) {
        // In a pipeline or loop only the last output is final
        let candidates = match mode {
            DispatchMode::Concurrent => results,
            DispatchMode::Mixed { concurrent } if results.len() <= concurrent => results,
            _ => results.len().checked_sub(1).map_or(&results[..0], |i| &results[i..]),
        };
        for result in candidates {
            if let Some(next) = result.output.meta(keys::NEXT_AGENT).filter(|_| result.is_success()) {
                self.chain(event, session, &result.agent_id, next, &result.output);
            }
        }

        for result in results {
            if let Some(err) = result.error() {
                let retrying = self
                    .handle_failure(event, session, &result.agent_id, err, token)
                    .await;
                self.route_error(event, session, &result.agent_id, err, retrying);
            }
        }
    }

    /// Re-emit an agent's output to the agent it named, one hop further
    fn chain(&self, event: &Event, session: &str, agent: &str, next: &str, output: &State) {
        let (data, mut meta) = output.clone().into_parts();
        for key in [keys::NEXT_AGENT, keys::RETRY_COUNT] {
            meta.remove(key);
        }
        meta.insert(keys::SESSION_ID, session);
        meta.insert(keys::HOP_COUNT, event.hop_count().saturating_add(1).to_string());
        let mut chained = Event::new(next, data, meta).with_source(agent);
        aim(&mut chained, next);

        let chained_id = chained.id();
        match self.gate.push(Queued {
            event: chained,
            seed: None,
        }) {
            Ok(()) => {
                debug!(from = agent, to = next, "Chained event emitted");
                self.record(
                    TraceKind::EventChained,
                    session,
                    event,
                    Some(agent),
                    json!({ "next_agent": next, "next_event_id": chained_id.to_string() }),
                );
            }
            Err(err) => {
                warn!(from = agent, to = next, error = %err, "Failed to emit chained event");
                self.record(
                    TraceKind::EventChained,
                    session,
                    event,
                    Some(agent),
                    json!({ "next_agent": next, "error": err.to_string(), "code": err.code() }),
                );
            }
        }
    }

    /// Retry, dead-letter or give up; true when a retry was scheduled
    async fn handle_failure(
        self: &Arc<Self>,
        event: &Arc<Event>,
        session: &str,
        agent: &str,
        err: &DispatchError,
        token: &CancellationToken,
    ) -> bool {
        match self.retry.decide(err, event.retry_count()) {
            RetryDecision::GiveUp => false,
            RetryDecision::Retry { attempt, delay } => {
                self.schedule_retry(event, session, agent, attempt, delay, token);
                true
            }
            RetryDecision::Exhausted { attempts } => {
                let exhausted = DispatchError::MaxRetriesExceeded {
                    agent: agent.to_string(),
                    attempts,
                    last_error: err.to_string(),
                };
                warn!(agent, attempts, "Retries exhausted");
                let args = CallbackArgs::new(
                    token.child_token(),
                    HookPoint::AgentError,
                    Arc::clone(event),
                    State::from_payload(event.payload()),
                )
                .with_agent(agent)
                .with_error(exhausted.clone());
                self.invoke_best_effort(HookPoint::AgentError, args, session, event)
                    .await;
                self.dead_letter(event, session, agent, &exhausted);
                false
            }
        }
    }

    /// Delayed re-emission aimed at the failing agent only
    fn schedule_retry(
        self: &Arc<Self>,
        event: &Event,
        session: &str,
        agent: &str,
        attempt: u32,
        delay: Duration,
        token: &CancellationToken,
    ) {
        let mut retry = event.derive(agent);
        aim(&mut retry, agent);
        retry.set_meta(keys::RETRY_COUNT, attempt.to_string());
        let retry_id = retry.id();

        info!(agent, attempt, delay_ms = delay.as_millis() as u64, "Scheduling retry");
        self.record(
            TraceKind::RetryScheduled,
            session,
            event,
            Some(agent),
            json!({
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64,
                "retry_event_id": retry_id.to_string(),
            }),
        );

        let this = Arc::clone(self);
        let token = token.clone();
        let session = session.to_string();
        let agent = agent.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {
                    this.discard(&retry);
                    return;
                }
            }
            if let Err(err) = this.gate.push(Queued {
                event: retry,
                seed: None,
            }) {
                warn!(agent = %agent, attempt, error = %err, "Failed to emit retry");
                let entry = TraceEntry::new(TraceKind::EventDiscarded, session, retry_id)
                    .with_agent(agent)
                    .with_data(error_data(&err));
                this.append(entry);
            }
        });
    }

    /// Send an exhausted event to the dead-letter target (or record it)
    fn dead_letter(&self, event: &Event, session: &str, agent: &str, err: &DispatchError) {
        let attempts = match err {
            DispatchError::MaxRetriesExceeded { attempts, .. } => *attempts,
            _ => 1,
        };
        let payload = EventData::from([
            ("original_event_id", Value::from(event.id().to_string())),
            ("failed_agent", Value::from(agent)),
            ("error", Value::from(err.to_string())),
            ("attempts", Value::from(attempts)),
            ("original_payload", Value::Map(event.payload().clone())),
        ]);

        let target = self
            .config
            .dead_letter_target
            .as_deref()
            .filter(|target| *target != agent);
        let Some(target) = target else {
            warn!(agent, "No usable dead-letter target, recording failed event in trace");
            self.record(
                TraceKind::DeadLettered,
                session,
                event,
                Some(agent),
                json!({ "target": null, "payload": Value::Map(payload).to_json() }),
            );
            return;
        };

        let data = match self.emit_failure_event(event, session, agent, target, payload) {
            Ok(letter_id) => json!({ "target": target, "dead_letter_event_id": letter_id.to_string() }),
            Err(err) => {
                warn!(agent, dead_letter = target, error = %err, "Failed to emit dead-letter event");
                json!({ "target": target, "error": err.to_string(), "code": err.code() })
            }
        };
        self.record(TraceKind::DeadLettered, session, event, Some(agent), data);
    }

    /// Report a failure to the error handler picked by the error router
    ///
    /// Events that already report a failure (error and dead-letter events)
    /// are not routed again.
    fn route_error(&self, event: &Event, session: &str, agent: &str, err: &DispatchError, retrying: bool) {
        if event.meta(keys::FAILED_AGENT).is_some() {
            return;
        }
        let Some(route) = self.errors.route(agent, err, retrying) else {
            return;
        };
        let payload = EventData::from([
            ("original_event_id", Value::from(event.id().to_string())),
            ("failed_agent", Value::from(agent)),
            ("error", Value::from(err.to_string())),
            ("error_code", Value::from(err.code())),
            ("category", Value::from(route.category.as_str())),
            ("severity", Value::from(route.severity.as_str())),
            ("recovery_action", Value::from(route.action.as_str())),
            ("retry_count", Value::from(event.retry_count())),
            ("original_payload", Value::Map(event.payload().clone())),
        ]);

        let handler = route.handler.as_str();
        let data = match self.emit_failure_event(event, session, agent, handler, payload) {
            Ok(error_event_id) => {
                debug!(agent, handler, category = %route.category, "Error routed");
                json!({
                    "handler": handler,
                    "category": route.category,
                    "severity": route.severity,
                    "recovery_action": route.action,
                    "error_event_id": error_event_id.to_string(),
                })
            }
            Err(push_err) => {
                warn!(agent, handler, error = %push_err, "Failed to emit error event");
                json!({ "handler": handler, "error": push_err.to_string(), "code": push_err.code() })
            }
        };
        self.record(TraceKind::ErrorRouted, session, event, Some(agent), data);
    }

    /// Queue an event describing `agent`'s failure, one hop further
    fn emit_failure_event(
        &self,
        event: &Event,
        session: &str,
        agent: &str,
        target: &str,
        payload: EventData,
    ) -> Result<Uuid, DispatchError> {
        let meta = Metadata::from([
            (keys::SESSION_ID, session.to_string()),
            (keys::FAILED_AGENT, agent.to_string()),
            (keys::HOP_COUNT, event.hop_count().saturating_add(1).to_string()),
        ]);
        let mut failure = Event::new(target, payload, meta).with_source(agent);
        aim(&mut failure, target);
        let id = failure.id();
        self.gate
            .push(Queued {
                event: failure,
                seed: None,
            })
            .map(|()| id)
    }

    // ═══════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════

    /// Invoke a hook whose failure must not change the dispatch outcome
    async fn invoke_best_effort(
        &self,
        hook: HookPoint,
        args: CallbackArgs,
        session: &str,
        event: &Event,
    ) {
        if let Err(err) = self.registry.invoke(hook, args).await {
            self.callback_failed(hook, &err, session, event);
        }
    }

    /// Feed a handler outcome to the agent's breaker
    fn settle_breaker(
        &self,
        breaker: &CircuitBreaker,
        outcome: &Result<State, DispatchError>,
        session: &str,
        event: &Event,
    ) {
        match outcome {
            Ok(_) => breaker.record_success(),
            Err(DispatchError::Cancelled { .. }) => breaker.release(),
            Err(err) => {
                if breaker.record_failure() {
                    self.record(
                        TraceKind::CircuitOpened,
                        session,
                        event,
                        Some(breaker.name()),
                        error_data(err),
                    );
                }
            }
        }
    }

    fn callback_failed(&self, hook: HookPoint, err: &DispatchError, session: &str, event: &Event) {
        warn!(%hook, error = %err, "Callback failed");
        self.record(
            TraceKind::CallbackFailed,
            session,
            event,
            None,
            hook_error_data(hook, err),
        );
    }

    fn record(
        &self,
        kind: TraceKind,
        session: &str,
        event: &Event,
        agent: Option<&str>,
        data: serde_json::Value,
    ) {
        let mut entry = TraceEntry::new(kind, session, event.id()).with_data(data);
        if let Some(agent) = agent {
            entry = entry.with_agent(agent);
        }
        self.append(entry);
    }

    fn append(&self, entry: TraceEntry) {
        let kind = entry.kind;
        if let Err(err) = self.trace.append(entry) {
            warn!(?kind, error = %err, "Trace append failed");
        }
    }
}

/// Point an event at one agent for every routing strategy
fn aim(event: &mut Event, agent: &str) {
    event.set_meta(keys::ROUTE_TO, agent);
    event.set_meta(keys::TARGETS, agent);
}

fn mode_name(mode: DispatchMode) -> &'static str {
    match mode {
        DispatchMode::Sequential => "sequential",
        DispatchMode::Concurrent => "concurrent",
        DispatchMode::Repeat { .. } => "repeat",
        DispatchMode::Mixed { .. } => "mixed",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn error_data(err: &DispatchError) -> serde_json::Value {
    json!({ "code": err.code(), "error": err.to_string() })
}

fn hook_error_data(hook: HookPoint, err: &DispatchError) -> serde_json::Value {
    json!({ "hook": hook, "code": err.code(), "error": err.to_string() })
}
