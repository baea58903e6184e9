// crates/core/src/lib.rs
pub mod cli;
pub mod llm;

pub use cli::{parse_version, resolved_cli_path, CliStatus};
