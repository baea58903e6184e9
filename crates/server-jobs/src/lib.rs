// crates/server-jobs/src/lib.rs
//! Keyed background sessions for long-running work.
//!
//! Provides:
//! - `SessionManager`: at most one live session per key, cancellation, cleanup
//! - `Pipeline` / `Stage`: ordered named stages reporting through events
//! - `Subscription`: the single reader of a session's events, with keepalive
//! - `TaskEvent`: `progress` / `error` / `done`

pub mod runner;
pub mod sessions;
pub mod subscription;
pub mod types;

pub use runner::{Pipeline, PipelineOutcome, Renderable, Stage};
pub use sessions::{EventSender, SessionManager, TaskContext};
pub use subscription::{Delivery, Subscription};
pub use types::{
    AbandonPolicy, SessionConfig, SessionId, SessionInfo, StartOutcome, SubscribeError, TaskEvent,
    CANCELLED_MESSAGE,
};
