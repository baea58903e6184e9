// crates/server-jobs/src/subscription.rs
//! The consumer side of a session's event channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedMutexGuard};

use crate::sessions::{Session, SessionManager};
use crate::types::TaskEvent;

/// One step of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(TaskEvent),
    /// Nothing arrived within the keepalive window.
    Ping,
    /// The terminal event was already delivered.
    Closed,
}

/// Exclusive reader of one session's events.
///
/// Relaying `done` removes the session. Dropping the subscription before
/// that arms the grace timer instead, so a client that reconnects in time
/// picks up where it left off.
pub struct Subscription {
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    receiver: OwnedMutexGuard<mpsc::UnboundedReceiver<TaskEvent>>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        manager: Arc<SessionManager>,
        session: Arc<Session>,
        receiver: OwnedMutexGuard<mpsc::UnboundedReceiver<TaskEvent>>,
    ) -> Self {
        Self {
            manager,
            session,
            receiver,
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.session.key
    }

    /// Wait up to `keepalive` for the next event.
    pub async fn next(&mut self, keepalive: Duration) -> Delivery {
        if self.closed {
            return Delivery::Closed;
        }

        match tokio::time::timeout(keepalive, self.receiver.recv()).await {
            Ok(Some(event)) => {
                if event.is_terminal() {
                    self.finish();
                }
                Delivery::Event(event)
            }
            Ok(None) => {
                // Every sender is gone; the runner always sends `done` first,
                // so this only happens after a detached session was dropped.
                tracing::warn!(key = %self.session.key, "event channel closed without done");
                self.finish();
                Delivery::Closed
            }
            Err(_) => Delivery::Ping,
        }
    }

    fn finish(&mut self) {
        self.closed = true;
        self.manager.remove_if(&self.session.key, self.session.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.session.key)
            .field("session_id", &self.session.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::info!(
            key = %self.session.key,
            session_id = self.session.id,
            grace_secs = self.manager.config().grace_period.as_secs(),
            "subscriber disconnected"
        );
        // The receiver guard is released after this body runs, so the timer
        // always observes the lock as free unless someone re-subscribed.
        self.manager.release_after_grace(Arc::clone(&self.session));
    }
}
