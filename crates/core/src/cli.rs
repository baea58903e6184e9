// crates/core/src/cli.rs
//! Claude CLI detection.
//!
//! Resolves the CLI path via the user's login shell so that nvm, mise, asdf,
//! ~/.local/bin and other non-standard PATH entries are picked up even when
//! the server was started by launchd or systemd with a minimal PATH.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Timeout for each detection subprocess.
const DETECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Cached resolved path to the `claude` binary (process-lifetime singleton).
static RESOLVED_CLI_PATH: OnceLock<Option<String>> = OnceLock::new();

/// Get the resolved path to the `claude` binary, resolving on first call.
pub fn resolved_cli_path() -> Option<&'static str> {
    RESOLVED_CLI_PATH.get_or_init(find_claude_path).as_deref()
}

/// What the health endpoint reports about the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliStatus {
    /// Path to the binary, `None` if not found.
    pub path: Option<String>,
    /// Whether the binary answered `--version`.
    pub available: bool,
    pub version: Option<String>,
}

/// Pull the version token out of `--version` output such as
/// `"2.1.3 (Claude Code)"` or `"claude version 1.0.12"`.
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Run a command with a timeout, returning `None` if it timed out or failed
/// to start. Session vars are removed so a nested CLI does not refuse to run.
fn run_with_timeout(cmd: &mut Command) -> Option<std::process::Output> {
    let mut child = cmd
        .env_remove("CLAUDECODE")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + DETECT_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

/// Login-shell waterfall:
///
/// 1. `$SHELL -lc "which claude"` (handles nvm/mise/asdf/custom PATH)
/// 2. the server's inherited PATH
/// 3. known install locations
fn find_claude_path() -> Option<String> {
    let found = std::env::var("SHELL")
        .ok()
        .and_then(|shell| which_via_shell(&shell))
        .or_else(|| {
            which::which("claude")
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .or_else(scan_known_paths);

    match &found {
        Some(path) => tracing::info!(path = %path, "resolved claude CLI"),
        None => tracing::warn!("claude CLI not found on PATH or in known locations"),
    }
    found
}

fn which_via_shell(shell: &str) -> Option<String> {
    let output = run_with_timeout(Command::new(shell).args(["-lc", "which claude"]))?;
    if !output.status.success() {
        return None;
    }
    // Login shells may print banners; the path is the last line.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path = stdout.lines().last()?.trim().to_string();
    (!path.is_empty() && Path::new(&path).is_file()).then_some(path)
}

fn scan_known_paths() -> Option<String> {
    let home = dirs::home_dir()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    [
        format!("{home}/.local/bin/claude"),
        format!("{home}/.claude/local/claude"),
        "/opt/homebrew/bin/claude".to_string(),
        "/usr/local/bin/claude".to_string(),
        "/usr/bin/claude".to_string(),
    ]
    .into_iter()
    .find(|p| Path::new(p).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_formats() {
        assert_eq!(parse_version("2.1.3 (Claude Code)\n"), Some("2.1.3".into()));
        assert_eq!(parse_version("claude version 1.0.12"), Some("1.0.12".into()));
        assert_eq!(parse_version("no digits here"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = CliStatus {
            path: Some("/opt/homebrew/bin/claude".into()),
            available: true,
            version: Some("2.1.3".into()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["path"], "/opt/homebrew/bin/claude");
        assert_eq!(json["available"], true);
        assert_eq!(json["version"], "2.1.3");
    }
}
