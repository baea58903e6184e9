//! Pipelines driven through a real `SessionManager`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use applydesk_server_jobs::{
    AbandonPolicy, Delivery, Pipeline, PipelineOutcome, Renderable, SessionConfig, SessionManager,
    Stage, Subscription, TaskEvent, CANCELLED_MESSAGE,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

#[derive(Default)]
struct Tally {
    steps: Vec<String>,
}

impl Renderable for Tally {
    fn render_fragment(&self) -> String {
        format!("<p>{}</p>", self.steps.join(","))
    }
}

struct Step(&'static str);

#[async_trait]
impl Stage<Tally> for Step {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, job: &mut Tally) -> anyhow::Result<()> {
        job.steps.push(self.0.to_string());
        Ok(())
    }
}

struct Fails(&'static str);

#[async_trait]
impl Stage<Tally> for Fails {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, _job: &mut Tally) -> anyhow::Result<()> {
        bail!("upstream said no\nwith detail on a second line")
    }
}

struct Panics;

#[async_trait]
impl Stage<Tally> for Panics {
    fn name(&self) -> &str {
        "stage 2"
    }

    async fn run(&self, _job: &mut Tally) -> anyhow::Result<()> {
        panic!("index out of bounds")
    }
}

/// Blocks until released, counting how often it ran.
struct Gate {
    release: Arc<Notify>,
    runs: Arc<AtomicU32>,
}

#[async_trait]
impl Stage<Tally> for Gate {
    fn name(&self) -> &str {
        "stage 1"
    }

    async fn run(&self, job: &mut Tally) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        job.steps.push("stage 1".into());
        Ok(())
    }
}

fn manager() -> Arc<SessionManager> {
    SessionManager::new(SessionConfig {
        grace_period: Duration::from_secs(30),
        abandon_policy: AbandonPolicy::Cancel,
    })
}

async fn drain(sub: &mut Subscription) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    loop {
        match sub.next(Duration::from_secs(5)).await {
            Delivery::Event(e) => events.push(e),
            Delivery::Ping => {}
            Delivery::Closed => return events,
        }
    }
}

fn start(manager: &Arc<SessionManager>, key: &str, pipeline: Pipeline<Tally>) -> tokio::sync::oneshot::Receiver<PipelineOutcome> {
    let pipeline = Arc::new(pipeline);
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.start(key, "test", move |task| async move {
        let outcome = pipeline.run(Tally::default(), &task).await;
        let _ = tx.send(outcome);
    });
    rx
}

#[tokio::test]
async fn all_stages_succeed() {
    let manager = manager();
    let pipeline = Pipeline::new()
        .stage(Step("stage 1"))
        .stage(Step("stage 2"))
        .stage(Step("stage 3"));
    assert_eq!(pipeline.stage_names(), vec!["stage 1", "stage 2", "stage 3"]);

    let outcome = start(&manager, "job-1", pipeline);
    let mut sub = manager.subscribe("job-1").unwrap();

    assert_eq!(
        drain(&mut sub).await,
        vec![
            TaskEvent::Progress("stage 1".into()),
            TaskEvent::Progress("stage 2".into()),
            TaskEvent::Progress("stage 3".into()),
            TaskEvent::Done("<p>stage 1,stage 2,stage 3</p>".into()),
        ]
    );
    assert_eq!(outcome.await.unwrap(), PipelineOutcome::Completed);
    assert!(!manager.contains("job-1"));
}

#[tokio::test]
async fn failing_middle_stage_reports_error_then_empty_done() {
    let manager = manager();
    let pipeline = Pipeline::new()
        .stage(Step("stage 1"))
        .stage(Fails("stage 2"))
        .stage(Step("stage 3"));

    let outcome = start(&manager, "job-1", pipeline);
    let mut sub = manager.subscribe("job-1").unwrap();

    assert_eq!(
        drain(&mut sub).await,
        vec![
            TaskEvent::Progress("stage 1".into()),
            TaskEvent::Progress("stage 2".into()),
            TaskEvent::Error("stage 2 failed: upstream said no with detail on a second line".into()),
            TaskEvent::Done(String::new()),
        ]
    );
    assert_eq!(
        outcome.await.unwrap(),
        PipelineOutcome::Failed {
            stage: "stage 2".into()
        }
    );
    assert!(!manager.contains("job-1"));
    assert!(manager.subscribe("job-1").is_err());
}

#[tokio::test]
async fn panicking_stage_is_reported_like_a_failure() {
    let manager = manager();
    let pipeline = Pipeline::new().stage(Step("stage 1")).stage(Panics).stage(Step("stage 3"));

    let outcome = start(&manager, "job-1", pipeline);
    let mut sub = manager.subscribe("job-1").unwrap();

    assert_eq!(
        drain(&mut sub).await,
        vec![
            TaskEvent::Progress("stage 1".into()),
            TaskEvent::Progress("stage 2".into()),
            TaskEvent::Error("stage 2 failed: internal error".into()),
            TaskEvent::Done(String::new()),
        ]
    );
    assert!(matches!(outcome.await.unwrap(), PipelineOutcome::Failed { .. }));
}

#[tokio::test]
async fn cancel_is_observed_at_next_stage_boundary() {
    let manager = manager();
    let release = Arc::new(Notify::new());
    let runs = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new()
        .stage(Gate {
            release: Arc::clone(&release),
            runs: Arc::clone(&runs),
        })
        .stage(Step("stage 2"));

    let outcome = start(&manager, "job-1", pipeline);
    let mut sub = manager.subscribe("job-1").unwrap();
    assert_eq!(
        sub.next(Duration::from_secs(5)).await,
        Delivery::Event(TaskEvent::Progress("stage 1".into()))
    );

    // Stage 1 is mid-flight; cancelling does not interrupt it.
    assert!(manager.cancel("job-1"));
    release.notify_one();

    assert_eq!(drain(&mut sub).await, vec![TaskEvent::Done(CANCELLED_MESSAGE.into())]);
    assert_eq!(outcome.await.unwrap(), PipelineOutcome::Cancelled);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn events_buffer_until_subscriber_arrives() {
    let manager = manager();
    let outcome = start(&manager, "job-1", Pipeline::new().stage(Step("only")));

    // Let the run finish before anyone subscribes.
    assert_eq!(outcome.await.unwrap(), PipelineOutcome::Completed);

    let mut sub = manager.subscribe("job-1").unwrap();
    assert_eq!(
        drain(&mut sub).await,
        vec![
            TaskEvent::Progress("only".into()),
            TaskEvent::Done("<p>only</p>".into()),
        ]
    );
}
