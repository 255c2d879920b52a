//! Lifecycle state machine and the queue's producer side
//!
//! `Created → Running → Draining → Stopped`. The gate owns the only queue
//! sender: closing it (drain) drops the sender so the dispatch loop sees the
//! end of the queue once everything already accepted is processed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{DispatchError, Result};
use crate::event::Event;
use crate::store::State;

/// Runner lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Running,
    /// No new events accepted; queued ones still being processed
    Draining,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    pub fn accepts_events(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue item: the event plus an optional caller-supplied seed state
pub(crate) struct Queued {
    pub event: Event,
    pub seed: Option<State>,
}

struct GateInner {
    lifecycle: Lifecycle,
    sender: Option<mpsc::Sender<Queued>>,
    capacity: usize,
}

/// Shared lifecycle + queue sender
pub(crate) struct Gate {
    inner: Mutex<GateInner>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                lifecycle: Lifecycle::Created,
                sender: None,
                capacity: 0,
            }),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    /// `Created → Running`: allocate the queue and hand back its receiver
    pub fn open(&self, capacity: usize) -> Result<mpsc::Receiver<Queued>> {
        let mut inner = self.inner.lock();
        if inner.lifecycle != Lifecycle::Created {
            return Err(DispatchError::RunnerAlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(capacity);
        inner.sender = Some(tx);
        inner.capacity = capacity;
        inner.lifecycle = Lifecycle::Running;
        Ok(rx)
    }

    /// Enqueue without waiting
    pub fn push(&self, queued: Queued) -> Result<()> {
        let inner = self.inner.lock();
        match inner.lifecycle {
            Lifecycle::Created => Err(DispatchError::RunnerNotStarted),
            Lifecycle::Draining | Lifecycle::Stopped => Err(DispatchError::RunnerStopped),
            Lifecycle::Running => {
                let sender = inner.sender.as_ref().ok_or(DispatchError::RunnerStopped)?;
                sender.try_send(queued).map_err(|err| match err {
                    TrySendError::Full(_) => DispatchError::QueueFull {
                        capacity: inner.capacity,
                    },
                    TrySendError::Closed(_) => DispatchError::RunnerStopped,
                })
            }
        }
    }

    /// `Running → Draining`; returns false if the runner was not running
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.lifecycle != Lifecycle::Running {
            return false;
        }
        inner.lifecycle = Lifecycle::Draining;
        inner.sender = None;
        true
    }

    /// Terminal state (loop exited)
    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.lifecycle = Lifecycle::Stopped;
        inner.sender = None;
    }
}

/// Cloneable producer handle for emitting from other tasks
#[derive(Clone)]
pub struct Emitter {
    gate: Arc<Gate>,
}

impl Emitter {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }

    /// Enqueue an event; never waits for processing
    pub fn emit(&self, event: Event) -> Result<()> {
        self.gate.push(Queued { event, seed: None })
    }

    /// Enqueue an event with a seed state for its first phase
    pub fn emit_with_state(&self, event: Event, state: State) -> Result<()> {
        self.gate.push(Queued {
            event,
            seed: Some(state),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.gate.lifecycle()
    }
}
