//! Prelude - import the working set with one line.
//!
//! # Usage
//!
//! ```rust
//! use tandem_core::prelude::*;
//! ```
//!
//! This brings in what most workflows touch:
//!
//! - [`Agent`], [`Schema`], [`AgentError`] for writing agents
//! - [`WorkflowBuilder`] for wiring the DAG
//! - [`WorkflowExecutor`], [`WorkflowResult`] for running it
//! - [`RunStore`], [`MergedInput`] for persistence and fan-in steps

pub use crate::agent::{Agent, AgentResult, ToolSpec};
pub use crate::builder::{WorkflowBuilder, WorkflowDefinition};
pub use crate::executor::{WorkflowExecutor, WorkflowResult};
pub use crate::schema::{MergedInput, Payload, Schema};
pub use crate::store::{ResumePlan, RunState, RunStore};
pub use crate::types::{AgentError, DefinitionError, StepName};
