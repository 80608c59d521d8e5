//! Durable run state on the filesystem.
//!
//! Each run of a workflow owns one self-contained directory, diffable and
//! inspectable with nothing but a text editor:
//!
//! ```text
//! <base_dir>/
//!   <workflow_name>_YYYYMMDD_HHMMSS/
//!     metadata.json
//!     steps/
//!       <step_name>/
//!         input.json          present once the step started
//!         output.json         present once the step completed
//!         status.json         always present after create_run
//! ```
//!
//! All JSON files are pretty-printed with two-space indentation and a
//! terminating newline; timestamps are ISO-8601 with the local offset.
//! Distinct steps own distinct directories, so workers persisting in
//! parallel never share a file; `metadata.json` is only rewritten between
//! waves.

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::schema::{Payload, Schema};

// ============================================================================
// ERRORS
// ============================================================================

/// Errors from run-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A read against a run directory, step directory, or file that does not exist.
    #[error("run state not found at {}", .0.display())]
    RunNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// RUN STATE
// ============================================================================

/// Lifecycle state shared by runs and steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// PERSISTED RECORDS
// ============================================================================

/// `metadata.json`: run-level state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub workflow_name: String,
    pub status: RunState,
    /// Step names in definition order.
    pub steps: Vec<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    /// Free-form caller configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// One retry record inside `status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub error: String,
    pub error_class: String,
    pub timestamp: DateTime<Local>,
}

/// `status.json`: per-step state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    pub status: RunState,
    pub retry_count: u32,
    pub error: Option<String>,
    pub error_class: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    /// Seconds of wall time for the completed step.
    pub duration: Option<f64>,
    #[serde(default)]
    pub retries: Vec<RetryRecord>,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self {
            status: RunState::Pending,
            retry_count: 0,
            error: None,
            error_class: None,
            started_at: None,
            completed_at: None,
            duration: None,
            retries: Vec::new(),
        }
    }
}

/// What a crashed or failed run would need to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Completed step names, in definition order.
    pub completed: Vec<String>,
    /// First step (in definition order) left `in_progress` or `failed`.
    pub resume_step: Option<String>,
    /// Every other non-completed step, in definition order.
    pub pending: Vec<String>,
}

// ============================================================================
// RUN STORE
// ============================================================================

/// Creates run directories and owns every read and write inside them.
#[derive(Debug, Clone)]
pub struct RunStore {
    base_dir: PathBuf,
}

impl RunStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the directory tree for a new run.
    ///
    /// The run starts `pending` with every step `pending`.
    pub fn create_run(
        &self,
        workflow_name: &str,
        step_names: &[String],
        config: Map<String, Value>,
    ) -> StoreResult<PathBuf> {
        let now = Local::now();
        let run_dir = self
            .base_dir
            .join(format!("{workflow_name}_{}", now.format("%Y%m%d_%H%M%S")));

        fs::create_dir_all(run_dir.join("steps"))?;
        for name in step_names {
            let step_dir = run_dir.join("steps").join(name);
            fs::create_dir_all(&step_dir)?;
            write_json(&step_dir.join("status.json"), &StepStatus::default())?;
        }

        let metadata = RunMetadata {
            workflow_name: workflow_name.to_owned(),
            status: RunState::Pending,
            steps: step_names.to_vec(),
            created_at: now,
            updated_at: now,
            config,
        };
        write_json(&run_dir.join("metadata.json"), &metadata)?;

        tracing::info!(
            workflow = workflow_name,
            run_dir = %run_dir.display(),
            steps = step_names.len(),
            "created run directory"
        );
        Ok(run_dir)
    }

    /// Handle for one step's files. Fails if the step directory is missing.
    pub fn step_store(&self, run_dir: &Path, step_name: &str) -> StoreResult<StepStore> {
        let dir = run_dir.join("steps").join(step_name);
        if !dir.is_dir() {
            return Err(StoreError::RunNotFound(dir));
        }
        Ok(StepStore { dir })
    }

    /// Transition a step to `in_progress`, stamping `started_at`.
    pub fn mark_step_in_progress(&self, run_dir: &Path, step_name: &str) -> StoreResult<()> {
        let store = self.step_store(run_dir, step_name)?;
        let mut status = store.read_status()?;
        status.status = RunState::InProgress;
        status.started_at = Some(Local::now());
        store.write_status(&status)
    }

    /// Transition a step to `completed`, recording its wall time.
    pub fn mark_step_completed(
        &self,
        run_dir: &Path,
        step_name: &str,
        duration: Duration,
    ) -> StoreResult<()> {
        let store = self.step_store(run_dir, step_name)?;
        let mut status = store.read_status()?;
        status.status = RunState::Completed;
        status.completed_at = Some(Local::now());
        status.duration = Some(duration.as_secs_f64());
        store.write_status(&status)
    }

    /// Transition a step to `failed`, appending a retry record.
    pub fn mark_step_failed(
        &self,
        run_dir: &Path,
        step_name: &str,
        error: &str,
        error_class: &str,
    ) -> StoreResult<()> {
        let store = self.step_store(run_dir, step_name)?;
        let mut status = store.read_status()?;
        status.retries.push(RetryRecord {
            error: error.to_owned(),
            error_class: error_class.to_owned(),
            timestamp: Local::now(),
        });
        status.retry_count += 1;
        status.status = RunState::Failed;
        status.error = Some(error.to_owned());
        status.error_class = Some(error_class.to_owned());
        store.write_status(&status)
    }

    /// Rewrite `metadata.json` with a new run status and `updated_at`.
    pub fn update_run_status(&self, run_dir: &Path, status: RunState) -> StoreResult<()> {
        let mut metadata = self.read_metadata(run_dir)?;
        metadata.status = status;
        metadata.updated_at = Local::now();
        write_json(&run_dir.join("metadata.json"), &metadata)?;
        tracing::debug!(run_dir = %run_dir.display(), status = %status, "updated run status");
        Ok(())
    }

    pub fn read_metadata(&self, run_dir: &Path) -> StoreResult<RunMetadata> {
        read_json(&run_dir.join("metadata.json"))
    }

    /// Every step's status, in definition order.
    pub fn load_step_statuses(&self, run_dir: &Path) -> StoreResult<Vec<(String, StepStatus)>> {
        let metadata = self.read_metadata(run_dir)?;
        let mut statuses = Vec::with_capacity(metadata.steps.len());
        for name in metadata.steps {
            let status = self.step_store(run_dir, &name)?.read_status()?;
            statuses.push((name, status));
        }
        Ok(statuses)
    }

    /// Decode one step's persisted output as schema `S`.
    pub fn load_step_output<S: Schema>(&self, run_dir: &Path, step_name: &str) -> StoreResult<S> {
        let value = self.step_store(run_dir, step_name)?.read_output()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Plan what a subsequent run against this directory would do.
    ///
    /// The first step in definition order whose status is `in_progress` or
    /// `failed` is the resume step; every other non-completed step is
    /// pending.
    pub fn resume_plan(&self, run_dir: &Path) -> StoreResult<ResumePlan> {
        let mut plan = ResumePlan {
            completed: Vec::new(),
            resume_step: None,
            pending: Vec::new(),
        };
        for (name, status) in self.load_step_statuses(run_dir)? {
            match status.status {
                RunState::Completed => plan.completed.push(name),
                RunState::InProgress | RunState::Failed if plan.resume_step.is_none() => {
                    plan.resume_step = Some(name);
                }
                _ => plan.pending.push(name),
            }
        }
        Ok(plan)
    }
}

// ============================================================================
// STEP STORE
// ============================================================================

/// Handle for one step's `input.json`, `output.json`, `status.json`.
#[derive(Debug, Clone)]
pub struct StepStore {
    dir: PathBuf,
}

impl StepStore {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the step's input value.
    pub fn write_input(&self, input: &Payload) -> StoreResult<()> {
        write_json(&self.dir.join("input.json"), input.value())
    }

    pub fn read_input(&self) -> StoreResult<Value> {
        read_json(&self.dir.join("input.json"))
    }

    /// Persist the step's output value.
    pub fn write_output(&self, output: &Payload) -> StoreResult<()> {
        write_json(&self.dir.join("output.json"), output.value())
    }

    pub fn read_output(&self) -> StoreResult<Value> {
        read_json(&self.dir.join("output.json"))
    }

    pub fn read_status(&self) -> StoreResult<StepStatus> {
        read_json(&self.dir.join("status.json"))
    }

    pub fn write_status(&self, status: &StepStatus) -> StoreResult<()> {
        write_json(&self.dir.join("status.json"), status)
    }
}

// ============================================================================
// JSON HELPERS
// ============================================================================

fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::RunNotFound(path.to_path_buf())
        } else {
            StoreError::Io(e)
        }
    })?;
    Ok(serde_json::from_str(&text)?)
}

// ============================================================================
// TESTS
// ============================================================================
