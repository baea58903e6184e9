// crates/core/src/llm/types.rs
//! Request and error types for CLI invocations.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Upper bound on any diagnostic text carried by an [`InvocationError`].
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Default wall-clock budget for one CLI call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Default turn budget. Structured output needs at least one follow-up turn
/// when the model's first answer fails schema validation.
pub const DEFAULT_MAX_TURNS: u32 = 3;

/// One structured-output request for the CLI.
///
/// Built per call and never mutated once handed to the invoker.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub system_prompt: String,
    pub user_content: String,
    /// JSON Schema the CLI must conform its answer to.
    pub schema: serde_json::Value,
    pub model: String,
    pub max_turns: u32,
    pub timeout: Duration,
}

impl InvocationRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_content: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_content: user_content.into(),
            schema,
            model: "sonnet".to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Closed set of failure kinds, for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProcessNotFound,
    Timeout,
    AuthenticationFailure,
    NonZeroExit,
    MalformedOutput,
    DeclaredError,
}

/// Errors that can occur during a CLI invocation.
///
/// Every diagnostic string is bounded by [`MAX_EXCERPT_CHARS`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("CLI not found: {program} ({detail})")]
    ProcessNotFound { program: String, detail: String },

    #[error("Timeout after {} seconds", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("CLI is not authenticated: {detail}")]
    AuthenticationFailed { detail: String },

    #[error("CLI exited with {}: {detail}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, detail: String },

    #[error("Malformed output: {reason}")]
    MalformedOutput {
        reason: String,
        excerpt: String,
        /// The CLI gave up after its own structured-output retries.
        retries_exhausted: bool,
    },

    #[error("CLI reported error: {0}")]
    DeclaredError(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl InvocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProcessNotFound { .. } => ErrorKind::ProcessNotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailure,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::DeclaredError(_) => ErrorKind::DeclaredError,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
            excerpt: excerpt(raw, MAX_EXCERPT_CHARS),
            retries_exhausted: false,
        }
    }

    /// Failure with nothing to go on: a non-zero exit that printed nothing on
    /// either stream, or a clean exit with empty stdout. The CLI produces these on the first
    /// call after its own startup; a second call usually succeeds.
    pub fn is_cold_start(&self) -> bool {
        match self {
            Self::NonZeroExit { detail, .. } => detail.trim().is_empty(),
            Self::MalformedOutput {
                excerpt,
                retries_exhausted,
                ..
            } => !retries_exhausted && excerpt.trim().is_empty(),
            _ => false,
        }
    }
}

/// Truncate `text` to at most `max_chars` characters, marking the cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
