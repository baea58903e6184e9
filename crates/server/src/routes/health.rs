// crates/server/src/routes/health.rs
//! Health check endpoint for the API.

use std::sync::Arc;

use applydesk_core::CliStatus;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Whether the tailoring pipeline can reach the CLI.
    pub cli: CliStatus,
}

/// GET /api/health - Health check endpoint.
///
/// Returns server status, version, uptime and what `claude --version` said
/// (cached, see [`crate::state::CLI_STATUS_TTL`]). A missing CLI does not
/// make the server unhealthy; the field says so.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        cli: state.cli_status().await,
    })
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 42,
            cli: CliStatus {
                path: None,
                available: false,
                version: None,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"version\":\"0.1.0\""));
        assert!(json.contains("\"uptime_secs\":42"));
        assert!(json.contains("\"cli\":{\"path\":null,\"available\":false,\"version\":null}"));
    }
}
