//! Session registry
//!
//! Tracks named persistent engine sessions by creation time. The registry is
//! process-scoped bookkeeping only: the engine owns the actual session
//! resources (and may expire them on its own 30-minute inactivity TTL - this
//! side observes that informationally). Registration is idempotent; removal
//! is unconditional even when engine-side teardown fails.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::engine::FetchEngine;

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    Created,
    AlreadyExists,
}

/// One listed session with its derived age.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: String,
    pub age_minutes: i64,
}

/// Mapping from session identifier to creation timestamp.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, DateTime<Utc>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session id, storing the current time if absent.
    ///
    /// Idempotent: an existing id is reported, never overwritten, so the
    /// original creation time survives repeat registration.
    pub fn register(&mut self, id: &str) -> Registered {
        if self.sessions.contains_key(id) {
            return Registered::AlreadyExists;
        }
        self.sessions.insert(id.to_string(), Utc::now());
        Registered::Created
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes a session id unconditionally. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// All sessions with derived ages, sorted by id.
    pub fn entries(&self) -> Vec<SessionEntry> {
        let now = Utc::now();
        let mut entries: Vec<SessionEntry> = self
            .sessions
            .iter()
            .map(|(id, created)| SessionEntry {
                id: id.clone(),
                age_minutes: (now - *created).num_minutes(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Empties the registry, returning the ids that were tracked.
    pub fn drain_ids(&mut self) -> Vec<String> {
        self.sessions.drain().map(|(id, _)| id).collect()
    }
}

/// Releases every engine-side session best-effort.
///
/// One failing teardown never blocks teardown of the rest; failures are
/// logged and the id is dropped from tracking regardless.
pub async fn release_sessions(ids: Vec<String>, engine: &dyn FetchEngine) {
    for id in ids {
        if let Err(e) = engine.kill_session(&id).await {
            tracing::warn!("Error killing session {}: {}", id, e);
        }
    }
}
