//! End-to-end workflow scenarios: chains, diamonds, retries, failure
//! containment, concurrency, and the persisted run state they leave behind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Barrier;
use tokio::time::timeout;

use tandem_core::executor::Sleep;
use tandem_core::prelude::*;

// ============================================================================
// TEST SCHEMAS & AGENTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TextDoc {
    text: String,
}

impl Schema for TextDoc {
    const NAME: &'static str = "TextDoc";
}

fn doc(text: &str) -> TextDoc {
    TextDoc { text: text.into() }
}

#[derive(Debug, Default)]
struct PassThrough;

#[async_trait]
impl Agent for PassThrough {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(input)
    }
}

#[derive(Debug, Default)]
struct Append;

#[async_trait]
impl Agent for Append {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(TextDoc {
            text: format!("{}:appended", input.text),
        })
    }
}

#[derive(Debug, Default)]
struct Upper;

#[async_trait]
impl Agent for Upper {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(TextDoc {
            text: input.text.to_uppercase(),
        })
    }
}

/// Joins every upstream output as `<step>=<text>`, sorted by step name.
#[derive(Debug, Default)]
struct Merge;

#[async_trait]
impl Agent for Merge {
    type Input = MergedInput;
    type Output = TextDoc;

    async fn call(&self, input: MergedInput) -> Result<TextDoc, AgentError> {
        let mut parts = Vec::new();
        for step in input.steps().map(str::to_owned).collect::<Vec<_>>() {
            let upstream: TextDoc = input.get(&step)?;
            parts.push(format!("{step}={}", upstream.text));
        }
        Ok(TextDoc {
            text: parts.join(","),
        })
    }
}

#[derive(Debug, Default)]
struct AlwaysFails;

#[async_trait]
impl Agent for AlwaysFails {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, _input: TextDoc) -> Result<TextDoc, AgentError> {
        Err(AgentError::failed("deliberate breakage"))
    }
}

/// Fails a fixed number of times, then passes its input through.
#[derive(Debug, Default)]
struct Flaky {
    failures: u32,
    attempts: Arc<AtomicU32>,
}

impl Flaky {
    fn failing(failures: u32) -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            Self {
                failures,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

#[async_trait]
impl Agent for Flaky {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(AgentError::failed(format!("flake on attempt {attempt}")))
        } else {
            Ok(input)
        }
    }
}

/// Blocks until every participant has entered `call` concurrently.
#[derive(Debug)]
struct Rendezvous {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Agent for Rendezvous {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        self.barrier.wait().await;
        Ok(input)
    }
}

/// Records requested back-off durations instead of sleeping.
#[derive(Debug, Default)]
struct RecordingSleep {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    fn durations(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleep for RecordingSleep {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn linear_chain_threads_output_through_each_step() {
    let workflow = Arc::new(
        WorkflowBuilder::new("linear")
            .step::<PassThrough>("a", &[])
            .step::<Append>("b", &["a"])
            .step::<Append>("c", &["b"])
            .build()
            .unwrap(),
    );

    let result = WorkflowExecutor::new(workflow)
        .run(&doc("start"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.step_results.len(), 3);
    assert_eq!(
        result.output_of::<TextDoc>("c").unwrap().text,
        "start:appended:appended"
    );
    assert!(result.duration > Duration::ZERO);
}

#[tokio::test]
async fn diamond_merges_both_branches() {
    let workflow = Arc::new(
        WorkflowBuilder::new("diamond")
            .step::<PassThrough>("root", &[])
            .step::<Append>("left", &["root"])
            .step::<Upper>("right", &["root"])
            .step::<Merge>("join", &["left", "right"])
            .build()
            .unwrap(),
    );

    let result = WorkflowExecutor::new(workflow)
        .run(&doc("hello"))
        .await
        .unwrap();

    assert!(result.success);
    let joined = result.output_of::<TextDoc>("join").unwrap().text;
    assert!(joined.contains("left=hello:appended"), "got: {joined}");
    assert!(joined.contains("right=HELLO"), "got: {joined}");
}

#[tokio::test]
async fn backoff_doubles_between_attempts() {
    let (flaky, attempts) = Flaky::failing(3);
    let sleep = Arc::new(RecordingSleep::default());

    let workflow = Arc::new(
        WorkflowBuilder::new("flaky")
            .step::<Flaky>("solo", &[])
            .build()
            .unwrap(),
    );
    let result = WorkflowExecutor::new(workflow)
        .with_retries(3)
        .with_agent("solo", flaky)
        .with_sleep(Arc::clone(&sleep))
        .run(&doc("x"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(
        sleep.durations(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test]
async fn per_step_retry_override_wins_over_global() {
    let (flaky, attempts) = Flaky::failing(1);

    let workflow = Arc::new(
        WorkflowBuilder::new("override")
            .step_with_retries::<Flaky>("solo", &[], 1)
            .build()
            .unwrap(),
    );
    let result = WorkflowExecutor::new(workflow)
        .with_retries(0)
        .with_agent("solo", flaky)
        .with_sleep(Arc::new(RecordingSleep::default()))
        .run(&doc("x"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failure_short_circuits_downstream_steps() {
    let workflow = Arc::new(
        WorkflowBuilder::new("broken")
            .step::<AlwaysFails>("bad", &[])
            .step::<Append>("after_bad", &["bad"])
            .build()
            .unwrap(),
    );

    let result = WorkflowExecutor::new(workflow)
        .run(&doc("x"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_step.as_ref().map(StepName::as_str), Some("bad"));
    assert!(!result.step_results.contains_key("after_bad"));
    assert!(!result.step_results.contains_key("bad"));

    let error = result.error.expect("error message present");
    assert!(error.contains("deliberate breakage"), "got: {error}");

    // Details are backtrace frames: at most five `N: symbol` headers, each
    // followed by its own indented location lines.
    let details = result.error_details.expect("error details present");
    assert!(!details.is_empty());
    let is_header = |line: &&str| {
        line.trim_start()
            .split_once(':')
            .is_some_and(|(index, _)| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
    };
    let headers = details.lines().filter(is_header).count();
    assert!((1..=5).contains(&headers), "got {headers} frames:\n{details}");
}

#[tokio::test]
async fn independent_steps_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));

    let workflow = Arc::new(
        WorkflowBuilder::new("parallel")
            .step::<PassThrough>("a", &[])
            .step::<PassThrough>("b", &[])
            .build()
            .unwrap(),
    );
    let executor = WorkflowExecutor::new(workflow)
        .with_agent(
            "a",
            Rendezvous {
                barrier: Arc::clone(&barrier),
            },
        )
        .with_agent(
            "b",
            Rendezvous {
                barrier: Arc::clone(&barrier),
            },
        );

    // Each agent parks at the barrier until the other arrives, so the run
    // only finishes if both steps were in flight at once.
    let result = timeout(Duration::from_secs(5), executor.run(&doc("x")))
        .await
        .expect("steps of one wave must run concurrently")
        .unwrap();

    assert!(result.success);
    assert_eq!(result.step_results.len(), 2);
}

// ============================================================================
// PERSISTED RUN STATE
// ============================================================================

#[tokio::test]
async fn successful_run_persists_full_history() {
    let tmp = tempdir().unwrap();
    let store = RunStore::new(tmp.path());

    let workflow = Arc::new(
        WorkflowBuilder::new("persisted")
            .step::<PassThrough>("draft", &[])
            .step::<Append>("edit", &["draft"])
            .build()
            .unwrap(),
    );
    let result = WorkflowExecutor::new(workflow)
        .with_run_store(store.clone())
        .run(&doc("start"))
        .await
        .unwrap();
    assert!(result.success);

    let run_dir = std::fs::read_dir(tmp.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert!(run_dir
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("persisted_"));

    let metadata = store.read_metadata(&run_dir).unwrap();
    assert_eq!(metadata.status, RunState::Completed);
    assert_eq!(metadata.steps, vec!["draft".to_string(), "edit".to_string()]);
    assert!(metadata.updated_at >= metadata.created_at);

    for (name, status) in store.load_step_statuses(&run_dir).unwrap() {
        assert_eq!(status.status, RunState::Completed, "step {name}");
        assert_eq!(status.retry_count, 0);
        assert!(status.started_at.is_some());
        assert!(status.completed_at.is_some());
        assert!(status.duration.is_some());
    }

    let edited: TextDoc = store.load_step_output(&run_dir, "edit").unwrap();
    assert_eq!(edited.text, "start:appended");

    let plan = store.resume_plan(&run_dir).unwrap();
    assert_eq!(plan.completed, vec!["draft".to_string(), "edit".to_string()]);
    assert_eq!(plan.resume_step, None);
    assert!(plan.pending.is_empty());
}

#[tokio::test]
async fn failed_run_records_failure_and_leaves_downstream_pending() {
    let tmp = tempdir().unwrap();
    let store = RunStore::new(tmp.path());

    let workflow = Arc::new(
        WorkflowBuilder::new("doomed")
            .step::<AlwaysFails>("bad", &[])
            .step::<Append>("after_bad", &["bad"])
            .build()
            .unwrap(),
    );
    let result = WorkflowExecutor::new(workflow)
        .with_run_store(store.clone())
        .run(&doc("x"))
        .await
        .unwrap();
    assert!(!result.success);

    let run_dir = std::fs::read_dir(tmp.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();

    let metadata = store.read_metadata(&run_dir).unwrap();
    assert_eq!(metadata.status, RunState::Failed);

    let statuses: std::collections::HashMap<_, _> = store
        .load_step_statuses(&run_dir)
        .unwrap()
        .into_iter()
        .collect();

    let bad = &statuses["bad"];
    assert_eq!(bad.status, RunState::Failed);
    assert_eq!(bad.retry_count, 1);
    assert_eq!(bad.error.as_deref(), Some("deliberate breakage"));
    assert_eq!(bad.error_class.as_deref(), Some("Failed"));
    assert_eq!(bad.retries.len(), 1);

    let downstream = &statuses["after_bad"];
    assert_eq!(downstream.status, RunState::Pending);
    assert!(downstream.started_at.is_none());
    assert!(!run_dir.join("steps/after_bad/input.json").exists());

    let plan = store.resume_plan(&run_dir).unwrap();
    assert_eq!(plan.resume_step.as_deref(), Some("bad"));
    assert_eq!(plan.pending, vec!["after_bad".to_string()]);
}

#[tokio::test]
async fn downstream_of_failure_never_runs_even_with_siblings() {
    // Root fails; its descendants never execute while the sibling branch of
    // the same wave is still allowed to finish or be discarded.
    let workflow = Arc::new(
        WorkflowBuilder::new("contained")
            .step::<AlwaysFails>("bad_root", &[])
            .step::<PassThrough>("ok_root", &[])
            .step::<Append>("bad_child", &["bad_root"])
            .step::<Append>("bad_grandchild", &["bad_child"])
            .build()
            .unwrap(),
    );

    let result = WorkflowExecutor::new(workflow)
        .run(&doc("x"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.failed_step.as_ref().map(StepName::as_str),
        Some("bad_root")
    );
    assert!(!result.step_results.contains_key("bad_child"));
    assert!(!result.step_results.contains_key("bad_grandchild"));
}
