//! API route handlers for the applydesk server.

pub mod health;
pub mod sessions;
pub mod tailor;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check, including CLI availability
/// - GET  /api/sessions - Live tailoring sessions
/// - POST /api/jobs/{job_id}/tailor - Start tailoring a résumé for a job
/// - GET  /api/jobs/{job_id}/tailor/stream - SSE stream of the run
/// - POST /api/jobs/{job_id}/tailor/cancel - Cancel the run
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", sessions::router())
        .nest("/api", tailor::router())
        .with_state(state)
}
