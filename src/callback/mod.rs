//! Callback Module - lifecycle hooks for observation and mutation
//!
//! Key types:
//! - `HookPoint`: dispatch phases plus the `All` wildcard
//! - `CallbackArgs`: token, event, state and phase-specific context
//! - `Callback`: async trait for hook functions (`callback_fn`, `observer_fn` adapters)
//! - `CallbackRegistry`: ordered, named, copy-on-write callback table

mod hook;
mod registry;

pub use hook::{CallbackArgs, HookPoint};
pub use registry::{callback_fn, observer_fn, Callback, CallbackRegistry, FnCallback, ObserverCallback};
