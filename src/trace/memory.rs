//! In-memory trace sink

use std::collections::VecDeque;

use dashmap::DashMap;

use super::{TraceEntry, TraceLogger};

const DEFAULT_MAX_ENTRIES_PER_SESSION: usize = 10_000;

/// Thread-safe, per-session trace store
///
/// Each session keeps at most `max_entries_per_session` entries; the oldest
/// are evicted first.
pub struct InMemoryTraceLogger {
    sessions: DashMap<String, VecDeque<TraceEntry>>,
    max_entries_per_session: usize,
}

impl InMemoryTraceLogger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES_PER_SESSION)
    }

    pub fn with_capacity(max_entries_per_session: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_entries_per_session: max_entries_per_session.max(1),
        }
    }

    /// Session ids seen so far (unordered)
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Total entries across all sessions
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

impl Default for InMemoryTraceLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLogger for InMemoryTraceLogger {
    fn append(&self, entry: TraceEntry) -> anyhow::Result<()> {
        let mut session = self.sessions.entry(entry.session_id.clone()).or_default();
        if session.len() >= self.max_entries_per_session {
            session.pop_front();
        }
        session.push_back(entry);
        Ok(())
    }

    fn query(&self, session_id: &str) -> anyhow::Result<Vec<TraceEntry>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceKind;
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    #[test]
    fn test_query_is_per_session_and_ordered() {
        let logger = InMemoryTraceLogger::new();
        let id = Uuid::new_v4();
        logger.append(TraceEntry::new(TraceKind::EventReceived, "s1", id)).unwrap();
        logger.append(TraceEntry::new(TraceKind::EventReceived, "s2", id)).unwrap();
        logger.append(TraceEntry::new(TraceKind::EventCompleted, "s1", id)).unwrap();

        let kinds: Vec<TraceKind> = logger.query("s1").unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TraceKind::EventReceived, TraceKind::EventCompleted]);
        assert_eq!(logger.query("s2").unwrap().len(), 1);
        assert!(logger.query("s3").unwrap().is_empty());
        assert_eq!(logger.len(), 3);
    }

    #[test]
    fn test_oldest_entries_evicted() {
        let logger = InMemoryTraceLogger::with_capacity(2);
        let id = Uuid::new_v4();
        for kind in [TraceKind::EventReceived, TraceKind::RouteResolved, TraceKind::EventCompleted] {
            logger.append(TraceEntry::new(kind, "s", id)).unwrap();
        }

        let kinds: Vec<TraceKind> = logger.query("s").unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TraceKind::RouteResolved, TraceKind::EventCompleted]);
    }

    #[test]
    fn test_concurrent_appends() {
        let logger = Arc::new(InMemoryTraceLogger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let logger = Arc::clone(&logger);
                thread::spawn(move || {
                    for _ in 0..100 {
                        logger
                            .append(TraceEntry::new(TraceKind::AgentStarted, "shared", Uuid::new_v4()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(logger.query("shared").unwrap().len(), 800);
        assert_eq!(logger.sessions(), vec!["shared".to_string()]);
    }
}
