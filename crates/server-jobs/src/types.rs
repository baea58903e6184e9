// crates/server-jobs/src/types.rs
//! Types for the session and background task system.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Unique identifier for one session run. A key can host many runs over
/// time; the id tells them apart.
pub type SessionId = u64;

/// Terminal message for a run stopped by `cancel`.
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// One event pushed by a background task, in production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress(String),
    Error(String),
    /// Terminal. Carries the rendered result, a cancellation notice, or an
    /// empty string after a failure.
    Done(String),
}

impl TaskEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Progress(_) => "progress",
            TaskEvent::Error(_) => "error",
            TaskEvent::Done(_) => "done",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TaskEvent::Progress(m) | TaskEvent::Error(m) | TaskEvent::Done(m) => m,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Done(_))
    }
}

/// What happens to a still-running task once its subscriber has been gone
/// for the whole grace period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AbandonPolicy {
    /// Request cancellation; the task stops at its next stage boundary.
    #[default]
    Cancel,
    /// Forget the session and let the task run to completion unobserved.
    Detach,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an unobserved session survives before it is released.
    pub grace_period: Duration,
    pub abandon_policy: AbandonPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            abandon_policy: AbandonPolicy::Cancel,
        }
    }
}

/// Snapshot of a live session, for listings and start acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(skip)]
    pub id: SessionId,
    pub key: String,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub subscribed: bool,
}

/// Result of [`SessionManager::start`](crate::SessionManager::start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionInfo),
    /// A session for the key was already live; nothing new was started.
    AlreadyRunning(SessionInfo),
}

impl StartOutcome {
    pub fn info(&self) -> &SessionInfo {
        match self {
            StartOutcome::Started(info) | StartOutcome::AlreadyRunning(info) => info,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("no session for key {0}")]
    NotFound(String),
    #[error("session {0} already has a subscriber")]
    AlreadySubscribed(String),
}
