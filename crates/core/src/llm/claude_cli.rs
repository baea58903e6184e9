// crates/core/src/llm/claude_cli.rs
//! Claude CLI invocation: spawns `claude -p` and resolves structured output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use super::classify::classify_output;
use super::process::{CommandSpec, ProcessRunner, SystemRunner};
use super::retry::with_cold_start_retry;
use super::types::{InvocationError, InvocationRequest};
use crate::cli::{parse_version, CliStatus};

/// Env vars set inside a Claude Code session. A child CLI that sees them
/// assumes it is nested and refuses to run.
const KNOWN_SESSION_VARS: [&str; 3] = ["CLAUDECODE", "CLAUDE_CODE_SSE_PORT", "CLAUDE_CODE_ENTRYPOINT"];

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Structured-output invocations through the Claude CLI binary.
///
/// Each [`invoke`](Self::invoke) spawns one process (two on a cold-start
/// retry) and returns the schema-conformant payload or an
/// [`InvocationError`].
#[derive(Clone)]
pub struct ClaudeCli {
    program: String,
    runner: Arc<dyn ProcessRunner>,
}

impl ClaudeCli {
    /// Run `program` (a bare name resolved via `PATH`, or a path) as a real
    /// OS process.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            runner: Arc::new(SystemRunner),
        }
    }

    /// Swap the process runner, e.g. for a scripted test double.
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command line for `request`.
    ///
    /// Command: `claude -p <content> --system-prompt <sys> --output-format json
    /// --json-schema <schema> --model <model> --max-turns <n> --tools ""`
    pub fn command_for(&self, request: &InvocationRequest) -> CommandSpec {
        let args = vec![
            "-p".to_string(),
            request.user_content.clone(),
            "--system-prompt".to_string(),
            request.system_prompt.clone(),
            "--output-format".to_string(),
            "json".to_string(),
            "--json-schema".to_string(),
            request.schema.to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
            // Empty tool list: pure generation, no file or shell access.
            "--tools".to_string(),
            String::new(),
        ];

        CommandSpec {
            program: self.program.clone(),
            args,
            env_remove: stripped_env_vars(),
            timeout: request.timeout,
        }
    }

    /// Run `request` and deserialize the structured answer as `T`.
    ///
    /// `T` is the Rust side of `request.schema`; a payload that does not
    /// deserialize is `MalformedOutput`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        request: &InvocationRequest,
    ) -> Result<T, InvocationError> {
        let spec = self.command_for(request);
        let t0 = Instant::now();

        let result = with_cold_start_retry(|attempt| self.attempt::<T>(&spec, &request.model, attempt)).await;

        match &result {
            Ok(_) => tracing::info!(
                model = %request.model,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "claude CLI: structured output resolved"
            ),
            Err(e) => tracing::error!(
                model = %request.model,
                kind = ?e.kind(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                error = %e,
                "claude CLI: invocation failed"
            ),
        }
        result
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        spec: &CommandSpec,
        model: &str,
        attempt: u32,
    ) -> Result<T, InvocationError> {
        let t0 = Instant::now();
        tracing::info!(
            model = %model,
            attempt,
            timeout_secs = spec.timeout.as_secs(),
            stripped_vars = ?spec.env_remove,
            "claude CLI: spawning"
        );

        let output = self.runner.run(spec).await?;

        tracing::info!(
            attempt,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            exit_code = ?output.exit_code,
            stdout_len = output.stdout.len(),
            "claude CLI: response received"
        );

        classify_output(&output)
    }

    /// Run `claude --version`, returning the trimmed version string.
    pub async fn health_check(&self) -> Result<String, InvocationError> {
        let spec = CommandSpec {
            program: self.program.clone(),
            args: vec!["--version".to_string()],
            env_remove: stripped_env_vars(),
            timeout: HEALTH_CHECK_TIMEOUT,
        };
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(output.stdout_text().trim().to_string())
        } else {
            Err(InvocationError::NonZeroExit {
                code: output.exit_code,
                detail: super::types::excerpt(output.stderr_text().trim(), 200),
            })
        }
    }

    /// Where the binary lives and whether it answers `--version`.
    pub async fn status(&self) -> CliStatus {
        // `which` walks PATH on disk.
        let program = self.program.clone();
        let path = tokio::task::spawn_blocking(move || SystemRunner::locate(&program))
            .await
            .ok()
            .and_then(Result::ok)
            .map(|p| p.display().to_string());
        match self.health_check().await {
            Ok(version) => CliStatus {
                path,
                available: true,
                version: parse_version(&version),
            },
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "claude CLI health check failed");
                CliStatus {
                    path,
                    available: false,
                    version: None,
                }
            }
        }
    }
}

impl Default for ClaudeCli {
    /// The binary found by login-shell detection, else plain `claude`.
    fn default() -> Self {
        Self::new(crate::resolved_cli_path().unwrap_or("claude"))
    }
}

/// The known session vars plus any other `CLAUDE`-prefixed var present now.
fn stripped_env_vars() -> Vec<String> {
    let extra = std::env::vars()
        .map(|(k, _)| k)
        .filter(|k| k.starts_with("CLAUDE") && !KNOWN_SESSION_VARS.contains(&k.as_str()));
    KNOWN_SESSION_VARS
        .iter()
        .map(|s| s.to_string())
        .chain(extra)
        .collect()
}
