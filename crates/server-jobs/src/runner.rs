// crates/server-jobs/src/runner.rs
//! Ordered, cancellable stage pipeline.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::sessions::TaskContext;
use crate::types::CANCELLED_MESSAGE;

/// Longest error summary shown to a user.
const MAX_SUMMARY_CHARS: usize = 300;

/// One named step of a [`Pipeline`], working on the shared job state `C`.
#[async_trait]
pub trait Stage<C: Send>: Send + Sync {
    /// Shown to the subscriber as the `progress` message.
    fn name(&self) -> &str;

    async fn run(&self, job: &mut C) -> anyhow::Result<()>;
}

/// Job state that can present its final result to a subscriber.
pub trait Renderable {
    /// The `done` payload after every stage succeeded.
    fn render_fragment(&self) -> String;
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Cancelled,
    Failed { stage: String },
}

/// Runs its stages in order, pushing events through a [`TaskContext`].
///
/// Before each stage: a cancellation check, then `progress(<stage name>)`.
/// A stage error or panic emits `error("<stage> failed: <summary>")` and an
/// empty `done`. Success emits `done` with the rendered job state.
pub struct Pipeline<C> {
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C: Renderable + Send> Pipeline<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, stage: impl Stage<C> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut job: C, task: &TaskContext) -> PipelineOutcome {
        let t0 = Instant::now();

        for stage in &self.stages {
            if task.is_cancelled() {
                tracing::info!(key = %task.key, next_stage = stage.name(), "pipeline cancelled");
                task.events.done(CANCELLED_MESSAGE);
                return PipelineOutcome::Cancelled;
            }

            task.events.progress(stage.name());
            let stage_t0 = Instant::now();

            let result = AssertUnwindSafe(stage.run(&mut job)).catch_unwind().await;
            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    tracing::warn!(key = %task.key, stage = stage.name(), error = %format!("{e:#}"), "stage failed");
                    Some(summarize(&e.to_string()))
                }
                Err(_) => {
                    tracing::error!(key = %task.key, stage = stage.name(), "stage panicked");
                    Some("internal error".to_string())
                }
            };

            if let Some(summary) = failure {
                task.events.error(format!("{} failed: {}", stage.name(), summary));
                task.events.done("");
                return PipelineOutcome::Failed {
                    stage: stage.name().to_string(),
                };
            }

            tracing::debug!(
                key = %task.key,
                stage = stage.name(),
                elapsed_ms = stage_t0.elapsed().as_millis() as u64,
                "stage complete"
            );
        }

        let fragment = job.render_fragment();
        tracing::info!(key = %task.key, elapsed_ms = t0.elapsed().as_millis() as u64, "pipeline complete");
        task.events.done(fragment);
        PipelineOutcome::Completed
    }
}

impl<C: Renderable + Send> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single line, bounded.
fn summarize(message: &str) -> String {
    let line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= MAX_SUMMARY_CHARS {
        return line;
    }
    let mut cut: String = line.chars().take(MAX_SUMMARY_CHARS).collect();
    cut.push('…');
    cut
}
