//! Agent contract and agent execution.
//!
//! An agent is a self-contained, typed computation: it declares an input
//! schema and an output schema through associated types and implements a
//! single `call`. Agents know nothing about scheduling, retries, or
//! persistence; those belong to the workflow executor.
//!
//! Because a DAG mixes agents with different schemas, the executor works
//! against the type-erased [`DynAgent`] object. [`AgentHandle`] wraps any
//! typed [`Agent`] into that object and carries the execution contract:
//! nominal input check, monotonic timing of `call`, output encoding.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Summarize;
//!
//! #[async_trait]
//! impl Agent for Summarize {
//!     type Input = TextDoc;
//!     type Output = TextDoc;
//!
//!     async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
//!         Ok(TextDoc { text: summarize(&input.text).await? })
//!     }
//!
//!     fn model(&self) -> Option<&str> {
//!         Some("gemini-2.0-flash")
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::schema::{Payload, Schema};
use crate::types::AgentError;

// ============================================================================
// TOOL METADATA
// ============================================================================

/// Descriptor for a tool an agent carries.
///
/// Opaque to the core: tools are surfaced so callers can inspect an agent's
/// declared capabilities, never invoked by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

// ============================================================================
// AGENT TRAIT
// ============================================================================

/// A typed unit of computation.
///
/// `Input` and `Output` are the declared schemas; `call` is the computation.
/// The remaining methods are informational metadata the core passes through
/// without interpreting.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Declared input schema.
    type Input: Schema;

    /// Declared output schema.
    type Output: Schema;

    /// Consume one input, produce one output.
    ///
    /// May perform arbitrary I/O. Failures are surfaced whole; the workflow
    /// executor owns the retry policy.
    async fn call(&self, input: Self::Input) -> Result<Self::Output, AgentError>;

    /// Informational model name, if any.
    fn model(&self) -> Option<&str> {
        None
    }

    /// Informational provider name, if any.
    fn provider(&self) -> Option<&str> {
        None
    }

    /// Tools this agent carries. Default: none.
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

// ============================================================================
// AGENT RESULT
// ============================================================================

/// Outcome of one successful agent execution.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// The encoded output value.
    pub output: Payload,
    /// Name of the agent type that produced it.
    pub agent: String,
    /// Monotonic wall time of the inner `call`.
    pub duration: Duration,
}

// ============================================================================
// TYPE-ERASED AGENT
// ============================================================================

/// Object-safe agent surface the executor schedules against.
#[async_trait]
pub trait DynAgent: Send + Sync {
    /// Short name of the underlying agent type.
    fn agent_name(&self) -> &'static str;

    /// Declared input schema name.
    fn input_schema(&self) -> &'static str;

    /// Declared output schema name.
    fn output_schema(&self) -> &'static str;

    /// Execute the agent against an encoded input.
    ///
    /// Validates the payload against the declared input schema, times the
    /// inner `call`, encodes the output. Never catches or retries; retries
    /// are the workflow executor's responsibility.
    async fn execute(&self, input: &Payload) -> Result<AgentResult, AgentError>;
}

/// Wrapper carrying a typed [`Agent`] behind the [`DynAgent`] object.
pub struct AgentHandle<A: Agent> {
    agent: A,
}

impl<A: Agent> AgentHandle<A> {
    pub fn new(agent: A) -> Self {
        Self { agent }
    }

    /// The wrapped agent.
    pub fn agent(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<A: Agent + 'static> DynAgent for AgentHandle<A> {
    fn agent_name(&self) -> &'static str {
        short_type_name::<A>()
    }

    fn input_schema(&self) -> &'static str {
        A::Input::NAME
    }

    fn output_schema(&self) -> &'static str {
        A::Output::NAME
    }

    async fn execute(&self, input: &Payload) -> Result<AgentResult, AgentError> {
        let input = input.decode::<A::Input>()?;

        let started = Instant::now();
        let output = self.agent.call(input).await?;
        let duration = started.elapsed();

        let output = Payload::of(&output)?;
        Ok(AgentResult {
            output,
            agent: self.agent_name().to_owned(),
            duration,
        })
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// TESTS
// ============================================================================
