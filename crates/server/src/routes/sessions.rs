// crates/server/src/routes/sessions.rs
//! Live session listing.

use std::sync::Arc;

use applydesk_server_jobs::SessionInfo;
use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;

/// GET /api/sessions - Sessions currently registered, oldest first.
///
/// A session stays listed until its `done` has been relayed, it was
/// cancelled, or its grace period ran out.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.active())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sessions", get(list_sessions))
}
