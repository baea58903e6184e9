// crates/server/src/test_support.rs
//! Shared fixtures for route tests.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use applydesk_core::llm::{ClaudeCli, CommandSpec, InvocationError, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use crate::collaborators::{FsResultStore, MarkdownRenderer};
use crate::config::ServerConfig;
use crate::state::AppState;

pub(crate) const TAILORED_ENVELOPE: &str = r#"{"type":"result","subtype":"success","is_error":false,"structured_output":{"headline":"Rust engineer","summary":"Builds services.","highlights":["Cut latency"],"keywords":["rust"],"fit_score":88}}"#;

/// Stands in for the `claude` binary.
pub(crate) struct FakeClaude {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub delay: Duration,
    pub calls: AtomicU32,
    /// `--version` invocations, counted apart from real requests.
    pub version_calls: AtomicU32,
}

impl FakeClaude {
    pub fn answering(stdout: &str) -> Arc<Self> {
        Arc::new(Self::owned(stdout))
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Self::owned("")
        })
    }

    pub fn slow(stdout: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::owned(stdout)
        })
    }

    fn owned(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            version_calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for FakeClaude {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, InvocationError> {
        if spec.args.first().map(String::as_str) == Some("--version") {
            self.version_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(ProcessOutput {
                exit_code: Some(0),
                stdout: b"2.1.0 (Claude Code)\n".to_vec(),
                stderr: Vec::new(),
            });
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ProcessOutput {
            exit_code: Some(self.exit_code),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: self.stderr.as_bytes().to_vec(),
        })
    }
}

pub(crate) fn test_state(runner: Arc<FakeClaude>, output_dir: &Path) -> Arc<AppState> {
    let config = ServerConfig {
        output_dir: output_dir.to_path_buf(),
        keepalive_secs: 1,
        grace_secs: 30,
        ..ServerConfig::default()
    };
    AppState::with_parts(
        config,
        ClaudeCli::new("claude").with_runner(runner),
        Arc::new(MarkdownRenderer),
        Arc::new(FsResultStore::new(output_dir)),
    )
}

pub(crate) async fn send(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, String) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// `(event, data)` pairs from an SSE body.
pub(crate) fn parse_sse(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut event = String::from("message");
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim_start().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = v.strip_prefix(' ').unwrap_or(v).to_string();
                }
            }
            (event, data)
        })
        .collect()
}
