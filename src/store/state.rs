//! Per-invocation working state
//!
//! Data and metadata live in separate ordered namespaces. `Clone` is a deep
//! copy, so each fan-out branch gets its own backing storage.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventData, Fields, Metadata, Value};

/// Mutable key/value store passed through callbacks and handlers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    data: EventData,
    #[serde(default)]
    meta: Metadata,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a state from an event payload (metadata namespace starts empty)
    pub fn from_payload(payload: &EventData) -> Self {
        Self {
            data: payload.clone(),
            meta: Metadata::new(),
        }
    }

    /// Seed a state from an event's payload and metadata
    pub fn from_event(event: &Event) -> Self {
        Self {
            data: event.payload().clone(),
            meta: event.metadata().clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key, value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Data keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.meta.insert(key, value.into())
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<String> {
        self.meta.remove(key)
    }

    /// Metadata keys in insertion order
    pub fn meta_keys(&self) -> impl Iterator<Item = &str> {
        self.meta.keys()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Overlay `other` onto this state (other wins on conflicting keys)
    pub fn merge(&mut self, other: &State) {
        self.data.merge(&other.data);
        self.meta.merge(&other.meta);
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_meta(key, value);
        self
    }

    pub fn into_parts(self) -> (EventData, Metadata) {
        (self.data, self.meta)
    }

    /// JSON snapshot of the data namespace (for trace entries)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.data).unwrap_or(serde_json::Value::Null)
    }
}

impl From<Fields<Value>> for State {
    fn from(data: Fields<Value>) -> Self {
        Self {
            data,
            meta: Metadata::new(),
        }
    }
}
