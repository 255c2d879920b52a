//! Callback registry - ordered, named callbacks per hook point
//!
//! Lookups happen on every dispatched event while registration is rare, so
//! the table is a copy-on-write snapshot: `invoke` clones an `Arc` under a
//! short read lock and iterates without holding any lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::hook::{CallbackArgs, HookPoint};
use crate::error::{DispatchError, Result};
use crate::store::State;

/// A function registered against a hook point
///
/// Returning `Ok(Some(state))` replaces the state for subsequent callbacks,
/// `Ok(None)` leaves it unchanged, and `Err` stops the chain.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, args: CallbackArgs) -> anyhow::Result<Option<State>>;
}

/// Adapter for async closures
pub struct FnCallback<F>(F);

#[async_trait]
impl<F, Fut> Callback for FnCallback<F>
where
    F: Fn(CallbackArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<State>>> + Send,
{
    async fn call(&self, args: CallbackArgs) -> anyhow::Result<Option<State>> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a callback
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn Callback>
where
    F: Fn(CallbackArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
{
    Arc::new(FnCallback(f))
}

/// Observer that never fails and never replaces state
pub struct ObserverCallback<F>(F);

#[async_trait]
impl<F> Callback for ObserverCallback<F>
where
    F: Fn(&CallbackArgs) + Send + Sync,
{
    async fn call(&self, args: CallbackArgs) -> anyhow::Result<Option<State>> {
        (self.0)(&args);
        Ok(None)
    }
}

/// Wrap a synchronous closure as a read-only observer
pub fn observer_fn<F>(f: F) -> Arc<dyn Callback>
where
    F: Fn(&CallbackArgs) + Send + Sync + 'static,
{
    Arc::new(ObserverCallback(f))
}

#[derive(Clone)]
struct Registration {
    hook: HookPoint,
    name: String,
    callback: Arc<dyn Callback>,
}

/// Thread-safe callback table
pub struct CallbackRegistry {
    entries: RwLock<Arc<Vec<Registration>>>,
    timeout: RwLock<Option<Duration>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            timeout: RwLock::new(None),
        }
    }

    /// Abort any callback that runs longer than `timeout`
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(Some(timeout));
        self
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.write() = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.read()
    }

    /// Register a callback; fails if `(hook, name)` is taken
    pub fn register(
        &self,
        hook: HookPoint,
        name: impl Into<String>,
        callback: Arc<dyn Callback>,
    ) -> Result<()> {
        let name = name.into();
        let mut guard = self.entries.write();
        if guard.iter().any(|r| r.hook == hook && r.name == name) {
            return Err(DispatchError::DuplicateCallbackName { hook, name });
        }
        debug!(%hook, name = %name, "Registered callback");
        Arc::make_mut(&mut *guard).push(Registration {
            hook,
            name,
            callback,
        });
        Ok(())
    }

    /// Remove a callback; returns false when nothing was registered
    pub fn unregister(&self, hook: HookPoint, name: &str) -> bool {
        let mut guard = self.entries.write();
        let Some(pos) = guard.iter().position(|r| r.hook == hook && r.name == name) else {
            return false;
        };
        Arc::make_mut(&mut *guard).remove(pos);
        debug!(%hook, name, "Unregistered callback");
        true
    }

    pub fn contains(&self, hook: HookPoint, name: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|r| r.hook == hook && r.name == name)
    }

    /// Names that fire at `phase` (wildcards included), in invocation order
    pub fn names_for(&self, phase: HookPoint) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|r| r.hook.applies_to(phase))
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> Arc<Vec<Registration>> {
        Arc::clone(&*self.entries.read())
    }

    /// Run every callback for `hook` (plus wildcards) in registration order
    ///
    /// Returns the state after the last callback. The first failure stops
    /// the chain: a `DispatchError` raised by a callback is returned as-is,
    /// anything else becomes `CallbackAborted`.
    pub async fn invoke(&self, hook: HookPoint, mut args: CallbackArgs) -> Result<State> {
        args.hook = hook;
        let snapshot = self.snapshot();
        let timeout = self.timeout();

        for reg in snapshot.iter().filter(|r| r.hook.applies_to(hook)) {
            let call = reg.callback.call(args.clone());
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(anyhow::anyhow!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )),
                },
                None => call.await,
            };

            match outcome {
                Ok(Some(next)) => args.state = next,
                Ok(None) => {}
                Err(err) => {
                    debug!(%hook, name = %reg.name, error = %err, "Callback failed");
                    return Err(match err.downcast::<DispatchError>() {
                        Ok(typed) => typed,
                        Err(err) => DispatchError::CallbackAborted {
                            hook,
                            name: reg.name.clone(),
                            reason: format!("{:#}", err),
                        },
                    });
                }
            }
        }

        Ok(args.state)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventData, Value};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    fn args() -> CallbackArgs {
        CallbackArgs::new(
            CancellationToken::new(),
            HookPoint::All,
            Arc::new(Event::broadcast(EventData::new())),
            State::new(),
        )
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Arc<dyn Callback> {
        let log = Arc::clone(log);
        let label = label.to_string();
        observer_fn(move |_| log.lock().push(label.clone()))
    }

    // ═══════════════════════════════════════════════════════════════
    // Registration
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_duplicate_name_rejected_per_hook() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(HookPoint::BeforeAgentRun, "audit", recorder(&log, "a"))
            .unwrap();
        let err = registry
            .register(HookPoint::BeforeAgentRun, "audit", recorder(&log, "b"))
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::DuplicateCallbackName {
                hook: HookPoint::BeforeAgentRun,
                name: "audit".into()
            }
        );
        // Same name under another hook is fine
        registry
            .register(HookPoint::AfterAgentRun, "audit", recorder(&log, "c"))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_reports_not_found() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(HookPoint::AgentError, "alert", recorder(&log, "x"))
            .unwrap();

        assert!(!registry.unregister(HookPoint::AfterAgentRun, "alert"));
        assert!(registry.unregister(HookPoint::AgentError, "alert"));
        assert!(!registry.unregister(HookPoint::AgentError, "alert"));
        assert!(registry.is_empty());
    }

    // ═══════════════════════════════════════════════════════════════
    // Invocation
    // ═══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_invoke_runs_matching_and_wildcard_in_registration_order() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(HookPoint::BeforeEventHandling, "first", recorder(&log, "first"))
            .unwrap();
        registry
            .register(HookPoint::All, "wild", recorder(&log, "wild"))
            .unwrap();
        registry
            .register(HookPoint::AfterEventHandling, "other", recorder(&log, "other"))
            .unwrap();
        registry
            .register(HookPoint::BeforeEventHandling, "last", recorder(&log, "last"))
            .unwrap();

        registry
            .invoke(HookPoint::BeforeEventHandling, args())
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["first", "wild", "last"]);
        assert_eq!(
            registry.names_for(HookPoint::BeforeEventHandling),
            vec!["first", "wild", "last"]
        );
    }

    #[tokio::test]
    async fn test_state_threads_through_callbacks() {
        let registry = CallbackRegistry::new();
        registry
            .register(
                HookPoint::BeforeAgentRun,
                "set",
                callback_fn(|args: CallbackArgs| async move {
                    Ok(Some(args.state.with("count", 1)))
                }),
            )
            .unwrap();
        registry
            .register(
                HookPoint::BeforeAgentRun,
                "bump",
                callback_fn(|args: CallbackArgs| async move {
                    let current = args.state.get("count").and_then(Value::as_f64).unwrap_or(0.0);
                    Ok(Some(args.state.clone().with("count", current + 1.0)))
                }),
            )
            .unwrap();
        registry
            .register(
                HookPoint::BeforeAgentRun,
                "noop",
                callback_fn(|_args: CallbackArgs| async move { Ok(None) }),
            )
            .unwrap();

        let state = registry.invoke(HookPoint::BeforeAgentRun, args()).await.unwrap();
        assert_eq!(state.get("count"), Some(&Value::Number(2.0)));
    }

    #[tokio::test]
    async fn test_first_error_stops_chain() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(HookPoint::AfterAgentRun, "before", recorder(&log, "before"))
            .unwrap();
        registry
            .register(
                HookPoint::AfterAgentRun,
                "veto",
                callback_fn(|_args: CallbackArgs| async move { Err(anyhow::anyhow!("nope")) }),
            )
            .unwrap();
        registry
            .register(HookPoint::AfterAgentRun, "after", recorder(&log, "after"))
            .unwrap();

        let err = registry
            .invoke(HookPoint::AfterAgentRun, args())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::CallbackAborted {
                hook: HookPoint::AfterAgentRun,
                name: "veto".into(),
                reason: "nope".into()
            }
        );
        assert_eq!(*log.lock(), vec!["before"]);
    }

    #[tokio::test]
    async fn test_typed_callback_error_is_kept() {
        let registry = CallbackRegistry::new();
        registry
            .register(
                HookPoint::BeforeEventHandling,
                "guard",
                callback_fn(|_args: CallbackArgs| async move {
                    Err(DispatchError::LoopDetected { hops: 4, max: 3 }.into())
                }),
            )
            .unwrap();

        let err = registry
            .invoke(HookPoint::BeforeEventHandling, args())
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::LoopDetected { hops: 4, max: 3 });
    }

    #[tokio::test]
    async fn test_callback_timeout_aborts() {
        let registry = CallbackRegistry::new().with_timeout(Duration::from_millis(20));
        registry
            .register(
                HookPoint::AfterEventHandling,
                "slow",
                callback_fn(|_args: CallbackArgs| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(None)
                }),
            )
            .unwrap();

        let err = registry
            .invoke(HookPoint::AfterEventHandling, args())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::CallbackAborted { ref name, .. } if name == "slow"));
    }

    #[tokio::test]
    async fn test_registration_during_invoke_does_not_affect_snapshot() {
        let registry = Arc::new(CallbackRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_registry = Arc::clone(&registry);
        let inner_log = Arc::clone(&log);
        registry
            .register(
                HookPoint::BeforeAgentRun,
                "adds-another",
                callback_fn(move |_args: CallbackArgs| {
                    let registry = Arc::clone(&inner_registry);
                    let log = Arc::clone(&inner_log);
                    async move {
                        registry.register(
                            HookPoint::BeforeAgentRun,
                            "late",
                            observer_fn(move |_| log.lock().push("late".to_string())),
                        )?;
                        Ok(None)
                    }
                }),
            )
            .unwrap();

        registry.invoke(HookPoint::BeforeAgentRun, args()).await.unwrap();
        assert!(log.lock().is_empty());
        assert!(registry.contains(HookPoint::BeforeAgentRun, "late"));
    }
}
