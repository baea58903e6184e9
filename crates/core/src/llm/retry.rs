// crates/core/src/llm/retry.rs
//! One-shot retry for the CLI's cold-start failure.

use std::future::Future;

use super::types::InvocationError;

/// Upper bound on attempts per invocation, first call included.
pub const MAX_ATTEMPTS: u32 = 2;

/// Run `attempt(1)`; if it fails with the cold-start signature
/// ([`InvocationError::is_cold_start`]) run `attempt(2)` and return that.
///
/// Nothing else is retried. Authentication and malformed-output failures go
/// straight back to the caller.
pub async fn with_cold_start_retry<T, F, Fut>(mut attempt: F) -> Result<T, InvocationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InvocationError>>,
{
    match attempt(1).await {
        Err(e) if e.is_cold_start() => {
            tracing::warn!(error = %e, "claude CLI: cold-start failure, retrying once");
            attempt(MAX_ATTEMPTS).await
        }
        other => other,
    }
}
