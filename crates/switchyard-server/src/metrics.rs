use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Transport counters, updated lock-free from every task.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    messages_dispatched: AtomicU64,
    replies_delivered: AtomicU64,
    replies_dropped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub messages_dispatched: u64,
    pub replies_delivered: u64,
    pub replies_dropped: u64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_delivered(&self) {
        self.replies_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_dropped(&self) {
        self.replies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            replies_delivered: self.replies_delivered.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
        }
    }
}
