//! Schema values - the typed data contract between agents.
//!
//! Every value that crosses a step boundary is a record type implementing
//! [`Schema`]. In a heterogeneous DAG the executor cannot know the concrete
//! types flowing along each edge, so values travel as a [`Payload`]: the
//! record's JSON representation stamped with its schema name. The name is the
//! nominal contract checked on entry to an agent; the JSON is the structural
//! one.
//!
//! # Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tandem_core::schema::{Payload, Schema};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
//! struct TextDoc {
//!     text: String,
//! }
//!
//! impl Schema for TextDoc {
//!     const NAME: &'static str = "TextDoc";
//! }
//!
//! let doc = TextDoc { text: "hello".into() };
//! let payload = Payload::of(&doc).unwrap();
//! assert_eq!(payload.schema(), "TextDoc");
//! assert_eq!(payload.decode::<TextDoc>().unwrap(), doc);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::AgentError;

// ============================================================================
// SCHEMA TRAIT
// ============================================================================

/// A structured, serializable record type with named fields.
///
/// The associated `NAME` is the nominal schema identity used for wire-level
/// checks and error messages; the structural shape is whatever serde derives.
pub trait Schema: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Nominal schema name, unique among the schemas of one workflow.
    const NAME: &'static str;
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// A type-erased schema value: JSON plus the schema name it was encoded from.
///
/// Payloads are what the executor moves between steps and what the run store
/// persists (the JSON alone; the schema name is an in-memory contract, the
/// same way the persisted files never record a type tag).
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    schema: String,
    value: Value,
}

impl Payload {
    /// Encode a schema value.
    pub fn of<S: Schema>(value: &S) -> Result<Self, AgentError> {
        let value = serde_json::to_value(value).map_err(|e| AgentError::InvalidOutput {
            expected: S::NAME,
            actual: format!("unserializable value ({e})"),
        })?;
        Ok(Self {
            schema: S::NAME.to_owned(),
            value,
        })
    }

    /// Decode back into a concrete schema type.
    ///
    /// Checks the nominal name first, then the structure. Either mismatch is
    /// an [`AgentError::InvalidInput`].
    pub fn decode<S: Schema>(&self) -> Result<S, AgentError> {
        if self.schema != S::NAME {
            return Err(AgentError::InvalidInput {
                expected: S::NAME,
                actual: self.schema.clone(),
            });
        }
        serde_json::from_value(self.value.clone()).map_err(|e| AgentError::InvalidInput {
            expected: S::NAME,
            actual: format!("malformed {} ({e})", self.schema),
        })
    }

    /// The nominal schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The underlying JSON value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn from_parts(schema: impl Into<String>, value: Value) -> Self {
        Self {
            schema: schema.into(),
            value,
        }
    }
}

// ============================================================================
// MERGED INPUT
// ============================================================================

/// Canonical input for a step with two or more upstreams.
///
/// Maps each upstream step name to that step's output value. A downstream
/// agent behind multiple upstreams must declare `MergedInput` as its input
/// schema; the nominal check in agent execution enforces this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedInput {
    pub outputs: BTreeMap<String, Value>,
}

impl Schema for MergedInput {
    const NAME: &'static str = "MergedInput";
}

impl MergedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one upstream output.
    pub fn insert(&mut self, step: impl Into<String>, output: Value) {
        self.outputs.insert(step.into(), output);
    }

    /// Decode the output of one upstream step.
    pub fn get<S: Schema>(&self, step: &str) -> Result<S, AgentError> {
        let value = self.outputs.get(step).ok_or_else(|| AgentError::InvalidInput {
            expected: S::NAME,
            actual: format!("no output for upstream step '{step}'"),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| AgentError::InvalidInput {
            expected: S::NAME,
            actual: format!("malformed output of upstream step '{step}' ({e})"),
        })
    }

    /// Upstream step names, in sorted order.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Build the payload form without going through serde.
    ///
    /// Merged inputs are assembled by the scheduler from values that are
    /// already JSON, so the encoding cannot fail.
    pub(crate) fn into_payload(self) -> Payload {
        let outputs: serde_json::Map<String, Value> = self.outputs.into_iter().collect();
        let mut root = serde_json::Map::with_capacity(1);
        root.insert("outputs".to_owned(), Value::Object(outputs));
        Payload::from_parts(Self::NAME, Value::Object(root))
    }
}

// ============================================================================
// TESTS
// ============================================================================
