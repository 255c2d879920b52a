//! Event envelope: identity, routing fields, payload and metadata

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::keys;
use super::value::{Fields, Value};

/// Typed payload carried by an event
pub type EventData = Fields<Value>;

/// String-keyed routing and control attributes
pub type Metadata = Fields<String>;

/// Unit of communication between agents
///
/// `id` and `timestamp` are fixed at construction. Everything else may be
/// set while building the event; once it is handed to `Runner::emit` the
/// runtime owns it and only shares it read-only (`Arc<Event>`), so the
/// setters below are only reachable before emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    /// Empty string means broadcast
    #[serde(default)]
    target: String,
    #[serde(default)]
    payload: EventData,
    #[serde(default)]
    metadata: Metadata,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp
    pub fn new(target: impl Into<String>, payload: EventData, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: None,
            target: target.into(),
            payload,
            metadata,
        }
    }

    /// Broadcast event (empty target) with the given payload
    pub fn broadcast(payload: EventData) -> Self {
        Self::new("", payload, Metadata::new())
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.is_empty()
    }

    pub fn payload(&self) -> &EventData {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.meta(keys::SESSION_ID).filter(|s| !s.is_empty())
    }

    /// Routing override from `route_to` metadata
    pub fn route_to(&self) -> Option<&str> {
        self.meta(keys::ROUTE_TO)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Agent subset named in `targets` metadata (comma-separated)
    pub fn target_list(&self) -> Option<Vec<&str>> {
        let raw = self.meta(keys::TARGETS)?;
        let names: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }

    /// Chained re-emit counter (missing or non-numeric reads as 0,
    /// values past `u32::MAX` saturate)
    pub fn hop_count(&self) -> u32 {
        self.counter(keys::HOP_COUNT)
    }

    /// Retry re-emit counter, read like `hop_count`
    pub fn retry_count(&self) -> u32 {
        self.counter(keys::RETRY_COUNT)
    }

    /// Handler deadline declared by the producer
    pub fn timeout(&self) -> Option<Duration> {
        self.meta(keys::TIMEOUT_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    fn counter(&self, key: &str) -> u32 {
        let Some(raw) = self.meta(key).map(str::trim) else {
            return 0;
        };
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return 0;
        }
        // all digits, so the parse only fails on overflow
        raw.parse::<u32>().unwrap_or(u32::MAX)
    }

    // ─────────────────────────────────────────────────────────────
    // Pre-emit mutation
    // ─────────────────────────────────────────────────────────────

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn set_session(&mut self, session_id: impl Into<String>) {
        self.metadata.insert(keys::SESSION_ID, session_id.into());
    }

    pub fn set_payload(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key, value.into());
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key, value.into());
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.set_source(source);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.set_session(session_id);
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_payload(key, value);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_meta(key, value);
        self
    }

    /// Fresh event (new id and timestamp) carrying this event's payload,
    /// metadata and source, aimed at `target`
    pub fn derive(&self, target: impl Into<String>) -> Self {
        let mut next = Self::new(target, self.payload.clone(), self.metadata.clone());
        next.source = self.source.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_event_has_unique_identity() {
        let a = Event::new("agent", EventData::new(), Metadata::new());
        let b = Event::new("agent", EventData::new(), Metadata::new());

        assert_ne!(a.id(), b.id());
        assert!(a.timestamp() <= b.timestamp());
        assert!(!a.is_broadcast());
    }

    #[test]
    fn test_empty_target_is_broadcast() {
        let event = Event::broadcast(EventData::from([("x", Value::from(1))]));
        assert!(event.is_broadcast());
        assert_eq!(event.payload().get("x"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_counters_parse_and_default() {
        let event = Event::new("a", EventData::new(), Metadata::new())
            .with_meta(keys::HOP_COUNT, "4")
            .with_meta(keys::RETRY_COUNT, "garbage");

        assert_eq!(event.hop_count(), 4);
        assert_eq!(event.retry_count(), 0);
    }

    #[test]
    fn test_counters_saturate_instead_of_wrapping() {
        let event = Event::new("a", EventData::new(), Metadata::new())
            .with_meta(keys::HOP_COUNT, "4294967296")
            .with_meta(keys::RETRY_COUNT, " 99999999999999999999999 ");

        assert_eq!(event.hop_count(), u32::MAX);
        assert_eq!(event.retry_count(), u32::MAX);
    }

    #[test]
    fn test_counters_reject_signs_and_blanks() {
        let event = Event::new("a", EventData::new(), Metadata::new())
            .with_meta(keys::HOP_COUNT, "-3")
            .with_meta(keys::RETRY_COUNT, "  ");

        assert_eq!(event.hop_count(), 0);
        assert_eq!(event.retry_count(), 0);
    }

    #[test]
    fn test_timeout_from_metadata() {
        let event = Event::new("a", EventData::new(), Metadata::new()).with_meta(keys::TIMEOUT_MS, "250");
        assert_eq!(event.timeout(), Some(Duration::from_millis(250)));

        let zero = Event::new("a", EventData::new(), Metadata::new()).with_meta(keys::TIMEOUT_MS, "0");
        assert_eq!(zero.timeout(), None);
    }

    #[test]
    fn test_target_list_trims_and_skips_blanks() {
        let event = Event::broadcast(EventData::new()).with_meta(keys::TARGETS, " a, ,b ,c");
        assert_eq!(event.target_list(), Some(vec!["a", "b", "c"]));

        let blank = Event::broadcast(EventData::new()).with_meta(keys::TARGETS, " , ");
        assert_eq!(blank.target_list(), None);
    }

    #[test]
    fn test_route_to_overrides_nothing_when_blank() {
        let event = Event::new("a", EventData::new(), Metadata::new()).with_meta(keys::ROUTE_TO, "  ");
        assert_eq!(event.route_to(), None);
    }

    #[test]
    fn test_derive_gets_new_identity_and_keeps_session() {
        let original = Event::new("a", EventData::from([("k", Value::from("v"))]), Metadata::new())
            .with_session("s-1")
            .with_source("producer");
        let next = original.derive("b");

        assert_ne!(next.id(), original.id());
        assert_eq!(next.target(), "b");
        assert_eq!(next.session_id(), Some("s-1"));
        assert_eq!(next.source(), Some("producer"));
        assert_eq!(next.payload(), original.payload());
    }

    #[test]
    fn test_event_serde_roundtrip_keeps_identity() {
        let event = Event::new("a", EventData::from([("x", Value::from(1))]), Metadata::new())
            .with_session("s");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
