// crates/server-jobs/src/sessions.rs
//! Keyed sessions: one background task and its event channel per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::subscription::Subscription;
use crate::types::{
    AbandonPolicy, SessionConfig, SessionId, SessionInfo, StartOutcome, SubscribeError, TaskEvent,
};

/// Producer half of a session's event channel.
///
/// Sends never block and never fail visibly: with no subscriber the event
/// is buffered, with the receiver gone it is dropped. Everything after the
/// first `done` is ignored so a session emits exactly one terminal event.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TaskEvent>,
    finished: Arc<AtomicBool>,
}

impl EventSender {
    fn send(&self, event: TaskEvent) {
        if self.finished.load(Ordering::Acquire) {
            tracing::debug!(event = event.name(), "event after done dropped");
            return;
        }
        if event.is_terminal() && self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.send(TaskEvent::Progress(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(TaskEvent::Error(message.into()));
    }

    pub fn done(&self, payload: impl Into<String>) {
        self.send(TaskEvent::Done(payload.into()));
    }

    /// Whether the terminal event has been sent.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Handed to a task's work function.
#[derive(Clone)]
pub struct TaskContext {
    pub key: String,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) key: String,
    label: String,
    started_at: DateTime<Utc>,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: Arc<Mutex<mpsc::UnboundedReceiver<TaskEvent>>>,
    finished: Arc<AtomicBool>,
    /// Bumped on every subscribe, so a grace timer can tell whether anyone
    /// attached after it was armed.
    pub(crate) epoch: AtomicU64,
}

impl Session {
    fn is_subscribed(&self) -> bool {
        self.events.try_lock().is_err()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            key: self.key.clone(),
            label: self.label.clone(),
            started_at: self.started_at,
            subscribed: self.is_subscribed(),
        }
    }
}

/// Owns the key → session map.
///
/// Thread-safe via `Arc` wrapping. `start` is a single check-and-insert
/// under the write lock; every removal is checked against the session id so
/// a stale cleanup never removes a newer session under the same key.
pub struct SessionManager {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start `work` under `key` unless a session is already live there.
    ///
    /// The work runs on its own task; this returns immediately. Whatever
    /// the work does, including panicking, the session ends with exactly one
    /// `done` event.
    pub fn start<F, Fut>(self: &Arc<Self>, key: impl Into<String>, label: impl Into<String>, work: F) -> StartOutcome
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicBool::new(false));

        let session = {
            let mut sessions = match self.sessions.write() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    tracing::error!("RwLock poisoned writing sessions map");
                    poisoned.into_inner()
                }
            };

            if let Some(existing) = sessions.get(&key) {
                // A finished run nobody is watching is superseded by a new
                // trigger; anything else is still live.
                if !(existing.is_finished() && !existing.is_subscribed()) {
                    tracing::info!(key = %key, session_id = existing.id, "session already running");
                    return StartOutcome::AlreadyRunning(existing.info());
                }
                tracing::info!(key = %key, session_id = existing.id, "replacing finished unobserved session");
            }

            let session = Arc::new(Session {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                key: key.clone(),
                label: label.into(),
                started_at: Utc::now(),
                cancel: CancellationToken::new(),
                events: Arc::new(Mutex::new(rx)),
                finished: Arc::clone(&finished),
                epoch: AtomicU64::new(0),
            });
            sessions.insert(key.clone(), Arc::clone(&session));
            session
        };

        let ctx = TaskContext {
            key: key.clone(),
            events: EventSender { tx, finished },
            cancel: session.cancel.clone(),
        };
        let info = session.info();
        let session_id = session.id;
        tracing::info!(key = %key, session_id, label = %info.label, "session started");

        let manager = Arc::clone(self);
        let events = ctx.events.clone();
        tokio::spawn(async move {
            // Nested spawn so a panic in the work surfaces as a JoinError
            // here instead of tearing down this wrapper.
            match tokio::spawn(work(ctx)).await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    tracing::error!(key = %key, session_id, "background task panicked");
                    events.error("Unexpected internal error");
                }
                Err(e) => {
                    tracing::error!(key = %key, session_id, error = %e, "background task aborted");
                    events.error("Task aborted");
                }
            }
            if !events.is_finished() {
                tracing::warn!(key = %key, session_id, "task returned without done, closing");
                events.done("");
            }
            drop(events);
            tracing::info!(key = %key, session_id, "background task finished");

            // Released by the subscriber once it relays `done`; this covers
            // the case where nobody ever reads it.
            if let Some(session) = manager.get(&key).filter(|s| s.id == session_id) {
                manager.release_after_grace(session);
            }
        });

        StartOutcome::Started(info)
    }

    /// Attach the single subscriber for `key`.
    pub fn subscribe(self: &Arc<Self>, key: &str) -> Result<Subscription, SubscribeError> {
        let session = self
            .get(key)
            .ok_or_else(|| SubscribeError::NotFound(key.to_string()))?;

        let receiver = Arc::clone(&session.events)
            .try_lock_owned()
            .map_err(|_| SubscribeError::AlreadySubscribed(key.to_string()))?;
        session.epoch.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(key = %key, session_id = session.id, "subscriber attached");
        Ok(Subscription::new(Arc::clone(self), session, receiver))
    }

    /// Request cooperative cancellation and drop the session entry. Returns
    /// `false` when no session exists for `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(session) = self.get(key) else {
            return false;
        };
        session.cancel.cancel();
        self.remove_if(key, session.id);
        tracing::info!(key = %key, session_id = session.id, "cancellation requested");
        true
    }

    /// Remove whatever session is registered under `key`.
    pub fn cleanup(&self, key: &str) -> bool {
        match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(key).is_some(),
            Err(e) => {
                tracing::error!("RwLock poisoned writing sessions map: {e}");
                false
            }
        }
    }

    /// Remove the entry for `key` only if it is still session `id`.
    pub(crate) fn remove_if(&self, key: &str, id: SessionId) -> bool {
        match self.sessions.write() {
            Ok(mut sessions) => {
                if sessions.get(key).is_some_and(|s| s.id == id) {
                    sessions.remove(key);
                    tracing::debug!(key = %key, session_id = id, "session removed");
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                tracing::error!("RwLock poisoned writing sessions map: {e}");
                false
            }
        }
    }

    /// Arm the grace timer for `session`. When it fires, the session is
    /// removed if nobody subscribed in the meantime, and the abandon policy
    /// is applied to a task that is still running.
    pub(crate) fn release_after_grace(self: &Arc<Self>, session: Arc<Session>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %session.key, "no runtime for grace timer, releasing session now");
            self.remove_if(&session.key, session.id);
            session.cancel.cancel();
            return;
        };

        let armed_epoch = session.epoch.load(Ordering::Acquire);
        let grace = self.config.grace_period;
        let policy = self.config.abandon_policy;
        let manager = Arc::clone(self);

        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if session.epoch.load(Ordering::Acquire) != armed_epoch || session.is_subscribed() {
                return;
            }
            if !manager.remove_if(&session.key, session.id) {
                return;
            }
            if session.is_finished() {
                tracing::info!(key = %session.key, session_id = session.id, "unobserved session expired");
                return;
            }
            match policy {
                AbandonPolicy::Cancel => {
                    tracing::info!(key = %session.key, session_id = session.id, "subscriber gone, cancelling task");
                    session.cancel.cancel();
                }
                AbandonPolicy::Detach => {
                    tracing::info!(key = %session.key, session_id = session.id, "subscriber gone, task detached");
                }
            }
        });
    }

    /// Snapshots of every live session (for listing endpoints).
    pub fn active(&self) -> Vec<SessionInfo> {
        match self.sessions.read() {
            Ok(sessions) => {
                let mut list: Vec<_> = sessions.values().map(|s| s.info()).collect();
                list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
                list
            }
            Err(e) => {
                tracing::error!("RwLock poisoned reading sessions: {e}");
                Vec::new()
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get(&self, key: &str) -> Option<Arc<Session>> {
        match self.sessions.read() {
            Ok(sessions) => sessions.get(key).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading sessions: {e}");
                None
            }
        }
    }
}
