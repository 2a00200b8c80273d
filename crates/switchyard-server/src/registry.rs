//! In-memory session registry.
//!
//! Single source of truth for live sessions. All operations are synchronous
//! and never suspend, so a lookup followed by a write on the returned session
//! cannot interleave with another task's removal of it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::ids::SessionId;
use tokio::time::Instant;

use crate::config::ReplyMode;
use crate::metrics::TransportMetrics;
use crate::writer::EventStreamWriter;

/// Which wire binding created the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Legacy,
    Unified,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Unified => f.write_str("unified"),
        }
    }
}

/// A live client session. Owns exactly one writer.
pub struct Session {
    pub id: SessionId,
    pub variant: Variant,
    pub created_at: DateTime<Utc>,
    pub reply_mode: ReplyMode,
    writer: Arc<EventStreamWriter>,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(id: SessionId, variant: Variant, reply_mode: ReplyMode, max_send_queue: usize) -> Self {
        Self {
            writer: Arc::new(EventStreamWriter::new(id.clone(), max_send_queue)),
            id,
            variant,
            created_at: Utc::now(),
            reply_mode,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn writer(&self) -> &Arc<EventStreamWriter> {
        &self.writer
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("created_at", &self.created_at)
            .field("reply_mode", &self.reply_mode)
            .field("writer", &self.writer.status())
            .finish()
    }
}

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_send_queue: usize,
    metrics: Arc<TransportMetrics>,
}

impl SessionRegistry {
    pub fn new(max_send_queue: usize, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_send_queue,
            metrics,
        }
    }

    /// Mint a session under a fresh id and store it.
    pub fn create(&self, variant: Variant, reply_mode: ReplyMode) -> Arc<Session> {
        loop {
            let id = SessionId::new();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id, variant, reply_mode, self.max_send_queue));
                slot.insert(Arc::clone(&session));
                self.metrics.session_opened();
                return session;
            }
        }
    }

    /// Resolve a live session. A session whose writer has closed but whose
    /// teardown has not yet run is already reported as gone.
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| !session.writer.is_closed())
    }

    /// Resolve a live session created by the given binding. Each binding
    /// only ever sees its own sessions.
    pub fn lookup_variant(&self, id: &SessionId, variant: Variant) -> Option<Arc<Session>> {
        self.lookup(id).filter(|session| session.variant == variant)
    }

    /// Remove a session and close its writer. Idempotent; returns the session
    /// only to the caller that actually removed it.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.writer.close();
        self.metrics.session_closed();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Ids of sessions with no inbound activity for at least `max_idle`.
    pub fn idle_sessions(&self, max_idle: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|e| e.value().idle_for() >= max_idle)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove every session. Returns how many were removed.
    pub fn drain(&self) -> usize {
        self.ids().iter().filter(|id| self.remove(id).is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterStatus;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(32, Arc::new(TransportMetrics::new()))
    }

    #[test]
    fn create_and_lookup() {
        let reg = registry();
        let s = reg.create(Variant::Legacy, ReplyMode::Stream);
        assert_eq!(reg.len(), 1);

        let found = reg.lookup(&s.id).unwrap();
        assert_eq!(found.id, s.id);
        assert_eq!(found.variant, Variant::Legacy);
        assert_eq!(found.reply_mode, ReplyMode::Stream);
        assert_eq!(found.writer().status(), WriterStatus::Detached);
    }

    #[test]
    fn created_ids_are_distinct() {
        let reg = registry();
        let a = reg.create(Variant::Unified, ReplyMode::Inline);
        let b = reg.create(Variant::Unified, ReplyMode::Inline);
        assert_ne!(a.id, b.id);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn lookup_unknown_is_none() {
        assert!(registry().lookup(&SessionId::new()).is_none());
    }

    #[test]
    fn remove_is_idempotent_and_closes_writer() {
        let reg = registry();
        let s = reg.create(Variant::Legacy, ReplyMode::Stream);

        let removed = reg.remove(&s.id).unwrap();
        assert!(removed.writer().is_closed());
        assert!(reg.remove(&s.id).is_none());
        assert!(reg.lookup(&s.id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn closed_writer_hides_session() {
        let reg = registry();
        let s = reg.create(Variant::Unified, ReplyMode::Inline);
        s.writer().close();
        assert!(reg.lookup(&s.id).is_none());
    }

    #[test]
    fn metrics_count_each_session_once() {
        let metrics = Arc::new(TransportMetrics::new());
        let reg = SessionRegistry::new(8, Arc::clone(&metrics));
        let s = reg.create(Variant::Legacy, ReplyMode::Stream);
        reg.remove(&s.id);
        reg.remove(&s.id);

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_opened, 1);
        assert_eq!(snap.sessions_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_found() {
        let reg = registry();
        let stale = reg.create(Variant::Legacy, ReplyMode::Stream);
        tokio::time::advance(Duration::from_secs(120)).await;
        let fresh = reg.create(Variant::Unified, ReplyMode::Inline);

        let idle = reg.idle_sessions(Duration::from_secs(60));
        assert_eq!(idle, vec![stale.id.clone()]);

        stale.touch();
        assert!(reg.idle_sessions(Duration::from_secs(60)).is_empty());
        drop(fresh);
    }

    #[test]
    fn drain_removes_all() {
        let reg = registry();
        let sessions: Vec<_> = (0..5)
            .map(|_| reg.create(Variant::Legacy, ReplyMode::Stream))
            .collect();
        assert_eq!(reg.drain(), 5);
        assert!(reg.is_empty());
        assert!(sessions.iter().all(|s| s.writer().is_closed()));
    }

    #[test]
    fn lookup_variant_scopes_to_binding() {
        let reg = registry();
        let legacy = reg.create(Variant::Legacy, ReplyMode::Stream);
        let unified = reg.create(Variant::Unified, ReplyMode::Inline);

        assert!(reg.lookup_variant(&legacy.id, Variant::Legacy).is_some());
        assert!(reg.lookup_variant(&legacy.id, Variant::Unified).is_none());
        assert!(reg.lookup_variant(&unified.id, Variant::Unified).is_some());
        assert!(reg.lookup_variant(&unified.id, Variant::Legacy).is_none());
        assert_eq!(reg.len(), 2);
    }
}
