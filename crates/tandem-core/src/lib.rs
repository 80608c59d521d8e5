//! # tandem-core
//!
//! Typed multi-agent workflows over DAGs.
//!
//! This crate provides:
//! - [`Agent`] - A typed unit of computation with declared input and output schemas
//! - [`WorkflowBuilder`] / [`WorkflowDefinition`] - A validated, frozen DAG of steps
//! - [`WorkflowExecutor`] - Wave-based parallel scheduling with per-step retries
//! - [`RunStore`] - Durable run state on the filesystem, one directory per run
//!
//! # How a run works
//!
//! | Phase | What happens |
//! |-------|--------------|
//! | Define | Steps and their `after` sets are validated once: missing deps, cycles, topo order |
//! | Schedule | Every step whose upstreams completed runs concurrently on its own task |
//! | Retry | Failed attempts back off 1, 2, 4, 8, ... seconds up to the effective cap |
//! | Persist | `metadata.json` and per-step `status.json`/`input.json`/`output.json` |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use tandem_core::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct TextDoc {
//!     text: String,
//! }
//!
//! impl Schema for TextDoc {
//!     const NAME: &'static str = "TextDoc";
//! }
//!
//! #[derive(Debug, Default)]
//! struct Shout;
//!
//! #[async_trait]
//! impl Agent for Shout {
//!     type Input = TextDoc;
//!     type Output = TextDoc;
//!
//!     async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
//!         Ok(TextDoc { text: input.text.to_uppercase() })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Arc::new(
//!         WorkflowBuilder::new("shout")
//!             .step::<Shout>("shout", &[])
//!             .build()?,
//!     );
//!
//!     let result = WorkflowExecutor::new(workflow)
//!         .with_retries(2)
//!         .with_run_store(RunStore::new("./runs"))
//!         .run(&TextDoc { text: "hello".into() })
//!         .await?;
//!
//!     println!("{}", result.output_of::<TextDoc>("shout")?.text);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod builder;
pub mod executor;
pub mod prelude;
pub mod schema;
pub mod store;
pub mod types;

pub use agent::{Agent, AgentHandle, AgentResult, DynAgent, ToolSpec};
pub use builder::{StepDef, WorkflowBuilder, WorkflowDefinition};
pub use executor::{ExecutorError, Sleep, TokioSleep, WorkflowExecutor, WorkflowResult};
pub use schema::{MergedInput, Payload, Schema};
pub use store::{
    ResumePlan, RetryRecord, RunMetadata, RunState, RunStore, StepStatus, StepStore, StoreError,
};
pub use types::{AgentError, DefinitionError, StepName};
