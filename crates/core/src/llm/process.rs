// crates/core/src/llm/process.rs
//! Child-process execution with piped output and a hard timeout.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};

use super::types::{excerpt, InvocationError, MAX_EXCERPT_CHARS};

/// How long to keep draining pipes after the child exits. A grandchild that
/// inherited the pipes can hold them open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to run one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables removed from the child's inherited environment.
    pub env_remove: Vec<String>,
    pub timeout: Duration,
}

/// Captured result of a child process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Runs a [`CommandSpec`] to completion.
///
/// Implementations return `ProcessNotFound` when the program does not exist,
/// `NonZeroExit` without a code when the OS refused to start it, and
/// `Timeout` when it overran; every other outcome, including a
/// non-zero exit, is an `Ok(ProcessOutput)` for the classifier to judge.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, InvocationError>;
}

/// [`ProcessRunner`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Resolve `program` to an executable path. Bare names go through `PATH`,
    /// anything containing a separator is taken as a path.
    pub fn locate(program: &str) -> Result<PathBuf, InvocationError> {
        let not_found = |detail: String| InvocationError::ProcessNotFound {
            program: program.to_string(),
            detail,
        };

        if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
            let path = Path::new(program);
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(not_found("no such file".to_string()))
            };
        }

        which::which(program).map_err(|e| not_found(e.to_string()))
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, InvocationError> {
        let path = Self::locate(&spec.program)?;
        let t0 = Instant::now();

        let mut cmd = TokioCommand::new(&path);
        cmd.args(&spec.args)
            // Null stdin so the child never blocks waiting for input
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down anything it forked.
        #[cfg(unix)]
        cmd.process_group(0);
        for var in &spec.env_remove {
            cmd.env_remove(var);
        }

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(program = %spec.program, error = %e, "failed to spawn process");
            spawn_error(&spec.program, &e)
        })?;

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                tracing::error!(program = %spec.program, error = %e, "failed to wait for process");
                return Err(InvocationError::NonZeroExit {
                    code: None,
                    detail: excerpt(&format!("failed to wait for process: {e}"), MAX_EXCERPT_CHARS),
                });
            }
            Err(_) => {
                kill_process_tree(&mut child, &spec.program).await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::error!(
                    program = %spec.program,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    timeout_secs = spec.timeout.as_secs_f64(),
                    "process timed out and was killed"
                );
                return Err(InvocationError::Timeout {
                    after: spec.timeout,
                });
            }
        };

        let stdout = collect(stdout_task, "stdout").await;
        let stderr = collect(stderr_task, "stderr").await;

        tracing::debug!(
            program = %spec.program,
            exit_code = ?status.code(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "process exited"
        );

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// A missing binary is `ProcessNotFound`; anything else the OS refused
/// (permissions, bad executable format) is reported with its OS error.
fn spawn_error(program: &str, e: &std::io::Error) -> InvocationError {
    if e.kind() == std::io::ErrorKind::NotFound {
        InvocationError::ProcessNotFound {
            program: program.to_string(),
            detail: e.to_string(),
        }
    } else {
        InvocationError::NonZeroExit {
            code: None,
            detail: excerpt(&format!("failed to start {program}: {e}"), MAX_EXCERPT_CHARS),
        }
    }
}

/// SIGKILL the child's whole process group, then kill and reap the child
/// itself.
async fn kill_process_tree(child: &mut Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::warn!(program, pid, error = %e, "failed to kill process group");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::error!(program, error = %e, "failed to kill timed-out process");
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::warn!(error = %e, read = buf.len(), "pipe read failed, keeping partial output");
        }
    }
    buf
}

async fn collect(task: tokio::task::JoinHandle<Vec<u8>>, stream: &'static str) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::warn!(stream, error = %e, "pipe reader task failed");
            Vec::new()
        }
        Err(_) => {
            abort.abort();
            tracing::warn!(stream, "pipe still open after exit, output dropped");
            Vec::new()
        }
    }
}
