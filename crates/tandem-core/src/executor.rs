//! Workflow executor - wave-based parallel scheduling of a validated DAG.
//!
//! The executor repeatedly computes the *ready set* (steps whose upstreams
//! have all completed), runs every ready step on its own task, and collects
//! outcomes over a channel. The first terminal step failure short-circuits
//! scheduling: no new wave starts, workers already in flight are awaited and
//! their outcomes discarded.
//!
//! Retries live here, not in agents: each step gets `retries + 1` attempts
//! with exponential back-off (1, 2, 4, 8, ... seconds) between them. The
//! back-off sleep goes through the [`Sleep`] trait so tests can substitute a
//! recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! let workflow = Arc::new(
//!     WorkflowBuilder::new("publish")
//!         .step::<Draft>("draft", &[])
//!         .step::<Edit>("edit", &["draft"])
//!         .build()?,
//! );
//!
//! let result = WorkflowExecutor::new(workflow)
//!     .with_retries(2)
//!     .with_run_store(RunStore::new("./runs"))
//!     .run(&TextDoc { text: "start".into() })
//!     .await?;
//!
//! assert!(result.success);
//! ```

use async_trait::async_trait;
use futures::future;
use serde_json::Map;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agent::{Agent, AgentHandle, AgentResult, DynAgent};
use crate::builder::{StepDef, WorkflowDefinition};
use crate::schema::{MergedInput, Payload, Schema};
use crate::store::{RunState, RunStore, StoreError};
use crate::types::{AgentError, StepName};

// ============================================================================
// SLEEP SEAM
// ============================================================================

/// Back-off sleeps go through this trait so tests can observe or skip them.
#[async_trait]
pub trait Sleep: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Default sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl<T: Sleep + ?Sized> Sleep for Arc<T> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

// ============================================================================
// EXECUTOR ERRORS
// ============================================================================

/// Errors that abort a run before or after the scheduling loop.
///
/// Step failures never surface here; they end up in [`WorkflowResult`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to encode initial input: {0}")]
    Input(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// WORKFLOW RESULT
// ============================================================================

/// Aggregate outcome of one workflow run.
#[derive(Debug)]
pub struct WorkflowResult {
    /// True when every step completed.
    pub success: bool,
    /// Results of every completed step.
    pub step_results: HashMap<StepName, AgentResult>,
    /// The step whose terminal failure stopped scheduling.
    pub failed_step: Option<StepName>,
    /// `Step '<name>' failed: <message>` for the failing step.
    pub error: Option<String>,
    /// First backtrace frames from the failure site.
    pub error_details: Option<String>,
    /// Total wall time of the run.
    pub duration: Duration,
}

impl WorkflowResult {
    /// Decode the output of one completed step.
    pub fn output_of<S: Schema>(&self, step: &str) -> Result<S, AgentError> {
        let result = self
            .step_results
            .get(step)
            .ok_or_else(|| AgentError::InvalidInput {
                expected: S::NAME,
                actual: format!("no result for step '{step}'"),
            })?;
        result.output.decode::<S>()
    }
}

// ============================================================================
// WORKFLOW EXECUTOR
// ============================================================================

/// Drives a [`WorkflowDefinition`] against an initial input.
///
/// The executor borrows the definition (shared via `Arc`) and owns only its
/// transient scheduling state; several executors can share one definition.
pub struct WorkflowExecutor {
    definition: Arc<WorkflowDefinition>,
    retries: u32,
    agents: HashMap<StepName, Arc<dyn DynAgent>>,
    store: Option<RunStore>,
    sleep: Arc<dyn Sleep>,
}

impl WorkflowExecutor {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            definition,
            retries: 0,
            agents: HashMap::new(),
            store: None,
            sleep: Arc::new(TokioSleep),
        }
    }

    /// Global retry cap: attempts beyond the first, per step. Default 0.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Inject a pre-instantiated agent for one step.
    ///
    /// Without an override the executor constructs a fresh instance from the
    /// step's agent type on every run.
    pub fn with_agent<A: Agent + 'static>(mut self, step: impl Into<StepName>, agent: A) -> Self {
        self.agents
            .insert(step.into(), Arc::new(AgentHandle::new(agent)));
        self
    }

    /// Record state transitions through a run store.
    pub fn with_run_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Substitute the back-off sleeper (test seam).
    pub fn with_sleep(mut self, sleep: impl Sleep + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Run the workflow, feeding `initial` to every root step.
    pub async fn run<S: Schema>(&self, initial: &S) -> Result<WorkflowResult, ExecutorError> {
        let payload = Payload::of(initial)?;
        self.run_payload(payload).await
    }

    /// Run the workflow from an already-encoded input.
    pub async fn run_payload(&self, initial: Payload) -> Result<WorkflowResult, ExecutorError> {
        let started = Instant::now();
        tracing::info!(
            workflow = self.definition.name(),
            steps = self.definition.len(),
            retries = self.retries,
            "starting workflow run"
        );

        let run_dir = self.create_run_dir()?;

        let mut remaining: BTreeSet<StepName> =
            self.definition.steps().map(|s| s.name().clone()).collect();
        let mut completed: BTreeSet<StepName> = BTreeSet::new();
        let mut step_results: HashMap<StepName, AgentResult> = HashMap::new();
        let mut failed_step: Option<StepName> = None;
        let mut error: Option<String> = None;
        let mut error_details: Option<String> = None;

        let mut wave = 0u32;
        while !remaining.is_empty() && failed_step.is_none() {
            let ready: Vec<&StepDef> = self
                .definition
                .steps()
                .filter(|s| {
                    remaining.contains(s.name()) && s.after().iter().all(|d| completed.contains(d))
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            wave += 1;
            tracing::debug!(
                workflow = self.definition.name(),
                wave,
                ready = ready.len(),
                "dispatching wave"
            );

            let (tx, mut rx) = mpsc::channel(ready.len());
            let mut handles = Vec::with_capacity(ready.len());
            for &step in &ready {
                let worker = StepWorker {
                    name: step.name().clone(),
                    agent: self.agent_for(step),
                    input: assemble_input(step, &initial, &step_results),
                    retries: step.retries().unwrap_or(self.retries),
                    sleep: Arc::clone(&self.sleep),
                    store: self
                        .store
                        .clone()
                        .zip(run_dir.clone()),
                };
                let tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    let name = worker.name.clone();
                    let outcome = worker.run().await;
                    // Capacity covers the wave, so the send cannot block even
                    // after the scheduler stops receiving.
                    let _ = tx.send((name, outcome)).await;
                }));
            }
            drop(tx);

            let mut collected = 0;
            while collected < ready.len() {
                let Some((name, outcome)) = rx.recv().await else {
                    break;
                };
                collected += 1;
                match outcome {
                    Ok(result) => {
                        remaining.remove(&name);
                        completed.insert(name.clone());
                        step_results.insert(name, result);
                    }
                    Err(failure) => {
                        tracing::error!(
                            workflow = self.definition.name(),
                            step = %name,
                            error = %failure.message,
                            "step failed terminally"
                        );
                        error = Some(format!("Step '{name}' failed: {}", failure.message));
                        error_details = Some(failure.details);
                        failed_step = Some(name);
                        break;
                    }
                }
            }

            // No abandoned workers: the wave fully drains before the next
            // scheduling decision, even after a failure.
            for join in future::join_all(handles).await {
                if let Err(e) = join {
                    tracing::warn!(error = %e, "step worker panicked");
                }
            }
        }

        let duration = started.elapsed();
        let success = failed_step.is_none();
        if let (Some(store), Some(dir)) = (&self.store, &run_dir) {
            let state = if success {
                RunState::Completed
            } else {
                RunState::Failed
            };
            store.update_run_status(dir, state)?;
        }
        tracing::info!(
            workflow = self.definition.name(),
            success,
            waves = wave,
            duration_ms = duration.as_millis() as u64,
            "workflow run finished"
        );

        Ok(WorkflowResult {
            success,
            step_results,
            failed_step,
            error,
            error_details,
            duration,
        })
    }

    fn create_run_dir(&self) -> Result<Option<PathBuf>, ExecutorError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let dir = store.create_run(
            self.definition.name(),
            &self.definition.step_names(),
            Map::new(),
        )?;
        store.update_run_status(&dir, RunState::InProgress)?;
        Ok(Some(dir))
    }

    fn agent_for(&self, step: &StepDef) -> Arc<dyn DynAgent> {
        self.agents
            .get(step.name())
            .cloned()
            .unwrap_or_else(|| step.instantiate())
    }
}

// ============================================================================
// INPUT ASSEMBLY
// ============================================================================

/// Compute a ready step's input from the initial input and upstream outputs.
///
/// Zero upstreams: the initial input. One upstream: its output, unchanged.
/// Two or more: a [`MergedInput`] keyed by upstream step name; the agent's
/// declared input schema enforces that contract at execution time.
fn assemble_input(
    step: &StepDef,
    initial: &Payload,
    results: &HashMap<StepName, AgentResult>,
) -> Result<Payload, AgentError> {
    let after = step.after();
    match after.len() {
        0 => Ok(initial.clone()),
        1 => after
            .iter()
            .next()
            .and_then(|dep| results.get(dep))
            .map(|r| r.output.clone())
            .ok_or_else(|| missing_upstream(step)),
        _ => {
            let mut merged = MergedInput::new();
            for dep in after {
                let result = results.get(dep).ok_or_else(|| missing_upstream(step))?;
                merged.insert(dep.as_str(), result.output.value().clone());
            }
            Ok(merged.into_payload())
        }
    }
}

fn missing_upstream(step: &StepDef) -> AgentError {
    AgentError::failed(format!(
        "upstream output missing for step '{}'",
        step.name()
    ))
}

// ============================================================================
// STEP WORKER
// ============================================================================

/// Terminal failure of one step, as reported to the scheduler.
#[derive(Debug)]
struct StepFailure {
    message: String,
    class: String,
    details: String,
}

impl StepFailure {
    fn agent(err: AgentError) -> Self {
        Self {
            message: err.to_string(),
            class: err.kind().to_owned(),
            details: backtrace_excerpt(5),
        }
    }

    fn store(err: StoreError) -> Self {
        Self {
            message: err.to_string(),
            class: "Store".to_owned(),
            details: backtrace_excerpt(5),
        }
    }
}

/// First `frames` frames of a captured backtrace, newline-joined.
///
/// A frame renders as a `N: symbol` header, optionally followed by indented
/// `at file:line` continuation lines; continuations stay with their frame.
fn backtrace_excerpt(frames: usize) -> String {
    let backtrace = std::backtrace::Backtrace::force_capture().to_string();
    let mut taken: Vec<&str> = Vec::new();
    let mut seen = 0usize;
    for line in backtrace.lines() {
        if is_frame_header(line) {
            seen += 1;
            if seen > frames {
                break;
            }
        } else if seen == 0 {
            continue;
        }
        taken.push(line.trim_end());
    }
    taken.join("\n")
}

/// Frame headers look like `  3: std::rt::lang_start`.
fn is_frame_header(line: &str) -> bool {
    match line.trim_start().split_once(':') {
        Some((index, _)) => !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Everything one step needs to run on its own task.
struct StepWorker {
    name: StepName,
    agent: Arc<dyn DynAgent>,
    /// Assembled input, or the assembly error to surface through the
    /// ordinary failure path.
    input: Result<Payload, AgentError>,
    retries: u32,
    sleep: Arc<dyn Sleep>,
    store: Option<(RunStore, PathBuf)>,
}

impl StepWorker {
    async fn run(&self) -> Result<AgentResult, StepFailure> {
        tracing::debug!(step = %self.name, agent = self.agent.agent_name(), "step started");
        if let Some((store, dir)) = &self.store {
            store
                .mark_step_in_progress(dir, self.name.as_str())
                .map_err(StepFailure::store)?;
            if let Ok(input) = &self.input {
                store
                    .step_store(dir, self.name.as_str())
                    .and_then(|s| s.write_input(input))
                    .map_err(StepFailure::store)?;
            }
        }

        match self.execute_with_retries().await {
            Ok(result) => {
                if let Some((store, dir)) = &self.store {
                    store
                        .step_store(dir, self.name.as_str())
                        .and_then(|s| s.write_output(&result.output))
                        .map_err(StepFailure::store)?;
                    store
                        .mark_step_completed(dir, self.name.as_str(), result.duration)
                        .map_err(StepFailure::store)?;
                }
                Ok(result)
            }
            Err(err) => {
                let failure = StepFailure::agent(err);
                if let Some((store, dir)) = &self.store {
                    if let Err(e) =
                        store.mark_step_failed(dir, self.name.as_str(), &failure.message, &failure.class)
                    {
                        tracing::warn!(step = %self.name, error = %e, "failed to persist step failure");
                    }
                }
                Err(failure)
            }
        }
    }

    /// The retry loop: `retries + 1` attempts, sleeping `2^(attempt-1)`
    /// seconds between them. Errors are propagated whole on the last attempt.
    async fn execute_with_retries(&self) -> Result<AgentResult, AgentError> {
        let mut attempt = 0u32;
        loop {
            let result = match &self.input {
                Ok(input) => self.agent.execute(input).await,
                Err(err) => Err(err.clone()),
            };
            match result {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1u64 << (attempt - 1).min(62));
                    tracing::warn!(
                        step = %self.name,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "step attempt failed, backing off"
                    );
                    self.sleep.sleep(backoff).await;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
