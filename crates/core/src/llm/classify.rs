// crates/core/src/llm/classify.rs
//! Maps a finished process to a typed payload or an [`InvocationError`].

use serde::de::DeserializeOwned;

use super::envelope;
use super::process::ProcessOutput;
use super::types::{excerpt, InvocationError, MAX_EXCERPT_CHARS};

/// Lowercase stderr fragments that mean the CLI has no usable login.
///
/// Heuristic. Misses land in `NonZeroExit`, which logs the stderr excerpt so
/// new phrasings can be added here.
const AUTH_KEYWORDS: &[&str] = &[
    "not logged in",
    "authentication required",
    "authentication_error",
    "please run /login",
    "run `claude login`",
    "login required",
    "invalid api key",
    "oauth token has expired",
    "unauthorized",
];

/// What a failed run said about itself: stderr, or when that is empty the
/// envelope's `result` text, or else raw stdout. The CLI reports some
/// failures only as an `is_error` envelope on stdout.
fn failure_diagnostic(output: &ProcessOutput) -> String {
    let stderr = output.stderr_text();
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = output.stdout_text();
    match envelope::Envelope::parse(&stdout) {
        Ok(env) => env
            .result
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| stdout.trim().to_string()),
        Err(_) => stdout.trim().to_string(),
    }
}

pub fn mentions_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    AUTH_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Classify a process that ran to completion.
///
/// Spawn failures and timeouts never reach this point: the runner reports
/// them directly.
pub fn classify_output<T: DeserializeOwned>(output: &ProcessOutput) -> Result<T, InvocationError> {
    if !output.success() {
        let diagnostic = failure_diagnostic(output);
        let detail = excerpt(&diagnostic, MAX_EXCERPT_CHARS);

        if mentions_auth_failure(&diagnostic) {
            tracing::error!(
                exit_code = ?output.exit_code,
                detail = %detail,
                "claude CLI: not authenticated"
            );
            return Err(InvocationError::AuthenticationFailed { detail });
        }

        tracing::warn!(
            exit_code = ?output.exit_code,
            stderr = %excerpt(output.stderr_text().trim(), 200),
            stdout = %excerpt(output.stdout_text().trim(), 200),
            "claude CLI: non-zero exit with no known signature"
        );
        return Err(InvocationError::NonZeroExit {
            code: output.exit_code,
            detail,
        });
    }

    envelope::resolve(&output.stdout_text())
}
