//! Session lifecycle: creation with teardown wiring, explicit termination,
//! idle expiry and shutdown.

use std::sync::{Arc, Weak};
use std::time::Duration;

use switchyard_core::ids::SessionId;
use tokio_util::sync::CancellationToken;

use crate::config::ReplyMode;
use crate::registry::{Session, SessionRegistry, Variant};

pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    idle_timeout: Option<Duration>,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        idle_timeout: Option<Duration>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            idle_timeout,
            sweep_interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Create a session whose writer tears the session down when it closes,
    /// whatever closed it: client disconnect, DELETE, idle expiry or shutdown.
    pub fn open_session(&self, variant: Variant, reply_mode: ReplyMode) -> Arc<Session> {
        let session = self.registry.create(variant, reply_mode);

        let registry: Weak<SessionRegistry> = Arc::downgrade(&self.registry);
        let id = session.id.clone();
        session.writer().on_close(move || {
            if let Some(registry) = registry.upgrade() {
                if registry.remove(&id).is_some() {
                    tracing::info!(session_id = %id, variant = %variant, "Session torn down");
                }
            }
        });

        // Raced with shutdown after the drain: close it so its stream ends.
        if self.cancel.is_cancelled() {
            self.registry.remove(&session.id);
            tracing::debug!(session_id = %session.id, "Session opened during shutdown, closed");
            return session;
        }

        tracing::info!(session_id = %session.id, variant = %variant, "Session opened");
        session
    }

    /// Remove and close a session. Returns false if it was already gone.
    pub fn terminate(&self, id: &SessionId) -> bool {
        match self.registry.remove(id) {
            Some(session) => {
                tracing::info!(session_id = %id, variant = %session.variant, "Session terminated");
                true
            }
            None => false,
        }
    }

    /// Close every session idle longer than the timeout.
    pub fn sweep_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        self.registry
            .idle_sessions(timeout)
            .iter()
            .filter(|id| {
                let removed = self.registry.remove(id).is_some();
                if removed {
                    tracing::info!(session_id = %id, "Idle session expired");
                }
                removed
            })
            .count()
    }

    /// Run `sweep_idle` periodically until shutdown.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if manager.idle_timeout.is_none() {
                return;
            }
            let mut ticker = tokio::time::interval(manager.sweep_interval);
            ticker.tick().await; // consume first immediate tick
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep_idle();
                        if removed > 0 {
                            tracing::info!(removed = removed, "Idle session sweep");
                        }
                    }
                }
            }
        })
    }

    /// Stop the sweeper and close all sessions.
    pub fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let closed = self.registry.drain();
        tracing::info!(closed = closed, "Closed all sessions");
        closed
    }
}
