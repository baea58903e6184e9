// crates/server/src/lib.rs
//! Applydesk server library.
//!
//! This crate provides the Axum-based HTTP server that tailors résumés to job
//! postings with the Claude CLI and streams each run's progress over SSE.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;
pub mod tailor;

#[cfg(test)]
mod test_support;

pub use config::ServerConfig;
pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, sessions, tailoring)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
