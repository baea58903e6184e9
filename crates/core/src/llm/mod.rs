// crates/core/src/llm/mod.rs
//! Structured-output invocations of the Claude CLI.
//!
//! [`ClaudeCli::invoke`] spawns the CLI with a JSON Schema, classifies the
//! process outcome and resolves the JSON envelope it prints into a typed
//! payload. Every failure is one [`InvocationError`] variant.

pub mod classify;
pub mod claude_cli;
pub mod envelope;
pub mod process;
pub mod retry;
pub mod types;

pub use claude_cli::ClaudeCli;
pub use envelope::Envelope;
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, SystemRunner};
pub use types::{ErrorKind, InvocationError, InvocationRequest};
