// crates/core/src/llm/envelope.rs
//! Resolution of the CLI's JSON envelope into a typed payload.
//!
//! `claude -p --output-format json --json-schema ...` prints one JSON object:
//!
//! ```json
//! {"type":"result","subtype":"success","is_error":false,
//!  "result":"...","structured_output":{...},"duration_ms":8123,"num_turns":2}
//! ```
//!
//! Some CLI releases leave `structured_output` out and put the payload in
//! `result` instead, either bare or inside a fenced code block. [`resolve`]
//! hides that from callers.

use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::types::{excerpt, InvocationError, MAX_EXCERPT_CHARS};

/// `subtype` reported when the CLI gave up producing schema-valid output.
pub const SUBTYPE_STRUCTURED_RETRIES_EXHAUSTED: &str = "error_max_structured_output_retries";

/// The fields of the CLI envelope this crate cares about.
///
/// Informational fields are read leniently: a wrong type reads as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub kind: Option<String>,
    pub subtype: Option<String>,
    pub is_error: bool,
    pub result: Option<String>,
    /// Only set when present and non-empty.
    pub structured_output: Option<Value>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub session_id: Option<String>,
}

impl Envelope {
    /// Parse raw stdout. Fails only when stdout is not a JSON object.
    pub fn parse(stdout: &str) -> Result<Self, InvocationError> {
        let value: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| InvocationError::malformed(format!("stdout is not JSON: {e}"), stdout))?;
        let Value::Object(map) = value else {
            return Err(InvocationError::malformed(
                "envelope is not a JSON object",
                stdout,
            ));
        };
        Ok(Self::from_map(map))
    }

    fn from_map(mut map: Map<String, Value>) -> Self {
        let text = |map: &Map<String, Value>, key: &str| {
            map.get(key).and_then(Value::as_str).map(str::to_string)
        };
        Self {
            kind: text(&map, "type"),
            subtype: text(&map, "subtype"),
            is_error: map.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            result: text(&map, "result"),
            duration_ms: map.get("duration_ms").and_then(Value::as_u64),
            num_turns: map.get("num_turns").and_then(Value::as_u64),
            total_cost_usd: map.get("total_cost_usd").and_then(Value::as_f64),
            session_id: text(&map, "session_id"),
            structured_output: map
                .remove("structured_output")
                .filter(|v| !is_empty_value(v)),
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.subtype.as_deref() == Some(SUBTYPE_STRUCTURED_RETRIES_EXHAUSTED)
    }

    fn result_text(&self) -> Option<&str> {
        self.result.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn error_message(&self) -> String {
        let message = self
            .result_text()
            .or(self.subtype.as_deref())
            .unwrap_or("unknown error");
        excerpt(message.trim(), MAX_EXCERPT_CHARS)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Turn raw CLI stdout into `T`, first match wins:
///
/// 1. stdout must parse as a JSON object
/// 2. `is_error: true` is a declared error
/// 3. a non-empty `structured_output` must deserialize as `T`
/// 4. a non-empty `result` is parsed as `T`, directly or from a fenced block
/// 5. a retry-exhaustion `subtype` is reported as such
/// 6. anything else is malformed
///
/// An envelope flagged both `is_error` and retry-exhaustion skips step 2 so the
/// more specific diagnosis survives.
pub fn resolve<T: DeserializeOwned>(stdout: &str) -> Result<T, InvocationError> {
    let envelope = Envelope::parse(stdout)?;

    tracing::debug!(
        kind = ?envelope.kind,
        subtype = ?envelope.subtype,
        is_error = envelope.is_error,
        duration_ms = ?envelope.duration_ms,
        num_turns = ?envelope.num_turns,
        total_cost_usd = ?envelope.total_cost_usd,
        session_id = ?envelope.session_id,
        "claude CLI: envelope parsed"
    );

    if envelope.is_error && !envelope.retries_exhausted() {
        return Err(InvocationError::DeclaredError(envelope.error_message()));
    }

    if let Some(payload) = &envelope.structured_output {
        return serde_json::from_value(payload.clone()).map_err(|e| {
            tracing::warn!(error = %e, "claude CLI: structured_output does not match schema");
            InvocationError::malformed(
                format!("structured_output does not match schema: {e}"),
                &payload.to_string(),
            )
        });
    }

    if let Some(text) = envelope.result_text() {
        if let Some(value) = parse_result_text(text) {
            tracing::info!(
                result_len = text.len(),
                "claude CLI: structured_output missing, payload recovered from result text"
            );
            return Ok(value);
        }
    }

    if envelope.retries_exhausted() {
        tracing::warn!(
            num_turns = ?envelope.num_turns,
            "claude CLI: gave up after exhausting structured output retries"
        );
        return Err(InvocationError::MalformedOutput {
            reason: "CLI exhausted its structured output retries without a valid payload"
                .to_string(),
            excerpt: excerpt(stdout, MAX_EXCERPT_CHARS),
            retries_exhausted: true,
        });
    }

    Err(InvocationError::malformed(
        "response contains neither a structured payload nor parseable text",
        stdout,
    ))
}

/// Parse free text as `T`, first as-is and then from each fenced block.
fn parse_result_text<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    fenced_blocks(text).find_map(|block| serde_json::from_str(block.trim()).ok())
}

fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    static FENCE: OnceLock<regex_lite::Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex_lite::Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```")
            .expect("valid fence regex")
    });
    fence
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}
