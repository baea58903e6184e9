// crates/server/src/routes/tailor.rs
//! Résumé tailoring API routes.
//!
//! - POST /jobs/{job_id}/tailor        - Start tailoring (idempotent per job)
//! - GET  /jobs/{job_id}/tailor/stream - SSE stream of the run's events
//! - POST /jobs/{job_id}/tailor/cancel - Cancel the running session

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_stream::Stream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::stream::event_stream;
use crate::tailor::{self, TailorJob, TailorRequest};
use applydesk_server_jobs::StartOutcome;

/// Session label shown in `GET /api/sessions`.
const LABEL: &str = "tailor";

const MAX_JOB_ID_LEN: usize = 64;

/// Response for POST /api/jobs/{job_id}/tailor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailorStartResponse {
    pub key: String,
    /// "started" or "already_running"
    pub status: &'static str,
    pub stream_url: String,
    pub cancel_url: String,
}

/// Response for POST /api/jobs/{job_id}/tailor/cancel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub key: String,
    pub cancel_requested: bool,
}

fn validate_job_id(job_id: &str) -> ApiResult<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "job id must be 1-{MAX_JOB_ID_LEN} characters of letters, digits, '-' or '_'"
        )))
    }
}

/// POST /api/jobs/{job_id}/tailor - Start a tailoring run.
///
/// Returns 202 when a new run started, 200 when one is already live for
/// this job. Never waits for the run itself.
async fn start_tailoring(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    body: Result<Json<TailorRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    validate_job_id(&job_id)?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if body.posting.trim().is_empty() {
        return Err(ApiError::BadRequest("posting must not be empty".to_string()));
    }
    if body.resume.trim().is_empty() {
        return Err(ApiError::BadRequest("resume must not be empty".to_string()));
    }

    let pipeline = tailor::pipeline(state.tailor_deps());
    let job = TailorJob::new(job_id.clone(), body);
    let outcome = state.sessions.start(job_id.clone(), LABEL, move |task| async move {
        pipeline.run(job, &task).await;
    });

    let (status_code, status) = match &outcome {
        StartOutcome::Started(_) => (StatusCode::ACCEPTED, "started"),
        StartOutcome::AlreadyRunning(_) => (StatusCode::OK, "already_running"),
    };

    Ok((
        status_code,
        Json(TailorStartResponse {
            stream_url: format!("/api/jobs/{job_id}/tailor/stream"),
            cancel_url: format!("/api/jobs/{job_id}/tailor/cancel"),
            key: job_id,
            status,
        }),
    ))
}

/// GET /api/jobs/{job_id}/tailor/stream - SSE stream of the run.
///
/// Events: `progress`, `error`, `done` (terminal, carries the HTML
/// fragment), and `ping` while idle.
async fn stream_tailoring(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = state.sessions.subscribe(&job_id)?;
    Ok(event_stream(subscription, state.config.keepalive()))
}

/// POST /api/jobs/{job_id}/tailor/cancel - Cancel the running session.
async fn cancel_tailoring(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.sessions.cancel(&job_id) {
        return Err(ApiError::SessionNotFound(job_id));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            key: job_id,
            cancel_requested: true,
        }),
    ))
}

/// Build the tailoring router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/{job_id}/tailor", post(start_tailoring))
        .route("/jobs/{job_id}/tailor/stream", get(stream_tailoring))
        .route("/jobs/{job_id}/tailor/cancel", post(cancel_tailoring))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailor::{STAGE_ASK, STAGE_READ, STAGE_RENDER, STAGE_SAVE};
    use crate::test_support::{parse_sse, send, test_state, FakeClaude, TAILORED_ENVELOPE};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    fn body() -> serde_json::Value {
        serde_json::json!({
            "posting": "<h1>Rust engineer</h1><p>Payments team</p>",
            "resume": "Eight years of backend work."
        })
    }

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("job-42").is_ok());
        assert!(validate_job_id("A_b-9").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("has space").is_err());
        assert!(validate_job_id(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_full_run_streams_progress_then_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeClaude::answering(TAILORED_ENVELOPE);
        let state = test_state(runner.clone(), dir.path());

        let (status, json) = send(app(state.clone()), "POST", "/api/jobs/job-42/tailor", Some(body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let json: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(json["key"], "job-42");
        assert_eq!(json["status"], "started");
        assert_eq!(json["streamUrl"], "/api/jobs/job-42/tailor/stream");
        assert_eq!(json["cancelUrl"], "/api/jobs/job-42/tailor/cancel");

        let (status, sse) = send(app(state.clone()), "GET", "/api/jobs/job-42/tailor/stream", None).await;
        assert_eq!(status, StatusCode::OK);

        let frames: Vec<_> = parse_sse(&sse).into_iter().filter(|(e, _)| e != "ping").collect();
        let names: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(names, vec!["progress", "progress", "progress", "progress", "done"]);
        let stages: Vec<&str> = frames[..4].iter().map(|(_, d)| d.as_str()).collect();
        assert_eq!(stages, vec![STAGE_READ, STAGE_ASK, STAGE_RENDER, STAGE_SAVE]);

        let fragment = &frames[4].1;
        assert!(fragment.contains("<h2>Rust engineer</h2>"));
        assert!(fragment.contains("Fit score: 88/100"));
        assert!(fragment.contains("job-42.md"));

        let saved = std::fs::read_to_string(dir.path().join("job-42.md")).unwrap();
        assert!(saved.starts_with("# Rust engineer"));
        assert_eq!(runner.calls(), 1);
        assert!(!state.sessions.contains("job-42"));
    }

    #[tokio::test]
    async fn test_second_trigger_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeClaude::slow(TAILORED_ENVELOPE, Duration::from_secs(30));
        let state = test_state(runner, dir.path());

        let (status, _) = send(app(state.clone()), "POST", "/api/jobs/job-42/tailor", Some(body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, json) = send(app(state.clone()), "POST", "/api/jobs/job-42/tailor", Some(body())).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(json["status"], "already_running");

        assert_eq!(state.sessions.active().len(), 1);
        state.sessions.cancel("job-42");
    }

    #[tokio::test]
    async fn test_invalid_input_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(FakeClaude::answering(TAILORED_ENVELOPE), dir.path());

        let empty = serde_json::json!({"posting": "   ", "resume": "r"});
        let (status, _) = send(app(state.clone()), "POST", "/api/jobs/job-1/tailor", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = serde_json::json!({"posting": "p"});
        let (status, _) = send(app(state.clone()), "POST", "/api/jobs/job-1/tailor", Some(missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app(state.clone()), "POST", "/api/jobs/bad%20id/tailor", Some(body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(state.sessions.active().is_empty());
    }

    #[tokio::test]
    async fn test_stream_and_cancel_unknown_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(FakeClaude::answering(TAILORED_ENVELOPE), dir.path());

        let (status, _) = send(app(state.clone()), "GET", "/api/jobs/nope/tailor/stream", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app(state.clone()), "POST", "/api/jobs/nope/tailor/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_second_subscriber_is_409() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeClaude::slow(TAILORED_ENVELOPE, Duration::from_secs(30));
        let state = test_state(runner, dir.path());
        send(app(state.clone()), "POST", "/api/jobs/job-42/tailor", Some(body())).await;

        let _held = state.sessions.subscribe("job-42").unwrap();
        let (status, json) = send(app(state.clone()), "GET", "/api/jobs/job-42/tailor/stream", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json.contains("already has a subscriber"));

        state.sessions.cancel("job-42");
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeClaude::slow(TAILORED_ENVELOPE, Duration::from_millis(200));
        let state = test_state(runner, dir.path());
        send(app(state.clone()), "POST", "/api/jobs/job-42/tailor", Some(body())).await;
        let mut subscription = state.sessions.subscribe("job-42").unwrap();

        let (status, json) = send(app(state.clone()), "POST", "/api/jobs/job-42/tailor/cancel", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let json: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(json["cancelRequested"], true);
        assert!(!state.sessions.contains("job-42"));

        // The stage in flight finishes; the next boundary ends the run.
        let mut last = None;
        loop {
            match subscription.next(Duration::from_secs(5)).await {
                applydesk_server_jobs::Delivery::Event(e) => last = Some(e),
                applydesk_server_jobs::Delivery::Ping => {}
                applydesk_server_jobs::Delivery::Closed => break,
            }
        }
        assert_eq!(
            last,
            Some(applydesk_server_jobs::TaskEvent::Done(
                applydesk_server_jobs::CANCELLED_MESSAGE.into()
            ))
        );
        assert!(!dir.path().join("job-42.md").exists());
    }

    #[tokio::test]
    async fn test_cli_failure_reports_error_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeClaude::failing(1, "Not logged in · Please run /login");
        let state = test_state(runner, dir.path());
        send(app(state.clone()), "POST", "/api/jobs/job-7/tailor", Some(body())).await;

        let (_, sse) = send(app(state.clone()), "GET", "/api/jobs/job-7/tailor/stream", None).await;
        let frames: Vec<_> = parse_sse(&sse).into_iter().filter(|(e, _)| e != "ping").collect();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1], ("progress".to_string(), STAGE_ASK.to_string()));
        assert_eq!(frames[2].0, "error");
        assert!(frames[2].1.starts_with(&format!("{STAGE_ASK} failed: Claude CLI is not logged in")));
        assert_eq!(frames[3], ("done".to_string(), String::new()));
    }
}
