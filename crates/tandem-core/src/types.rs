//! Core identifiers and error taxonomies for workflow definitions and agents.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Unique name of a step within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepName(String);

impl StepName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// DEFINITION ERRORS
// ============================================================================

/// Errors raised while building a workflow definition.
///
/// These fail fast at definition time and never reach execution.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("workflow '{workflow}' declares step '{step}' more than once")]
    DuplicateStep { workflow: String, step: StepName },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    MissingDependency {
        step: StepName,
        dependency: StepName,
    },

    #[error("dependency cycle through step '{step}'")]
    CircularDependency { step: StepName },
}

pub type DefinitionResult<T> = Result<T, DefinitionError>;

// ============================================================================
// AGENT ERRORS
// ============================================================================

/// Errors raised by agent execution.
///
/// Schema violations and runtime failures are both treated as step failures
/// by the workflow executor and are subject to its retry policy.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The payload handed to an agent does not match its declared input schema.
    #[error("Expected {expected}, got {actual}")]
    InvalidInput {
        expected: &'static str,
        actual: String,
    },

    /// The value an agent produced could not be carried as its declared output schema.
    #[error("Expected {expected}, got {actual}")]
    InvalidOutput {
        expected: &'static str,
        actual: String,
    },

    /// A runtime failure inside the agent's `call`.
    #[error("{0}")]
    Failed(String),
}

impl AgentError {
    /// A runtime failure with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Short name of the error kind, recorded as `error_class` in run state.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "InvalidInput",
            Self::InvalidOutput { .. } => "InvalidOutput",
            Self::Failed(_) => "Failed",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_name() {
        let a = StepName::new("draft");
        let b: StepName = "draft".into();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "draft");
        assert_eq!(format!("{a}"), "draft");
    }

    #[test]
    fn test_step_name_borrow_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(StepName::new("edit"), 1);
        assert_eq!(map.get("edit"), Some(&1));
    }

    #[test]
    fn test_agent_error_messages() {
        let err = AgentError::InvalidInput {
            expected: "TextDoc",
            actual: "MergedInput".into(),
        };
        assert_eq!(err.to_string(), "Expected TextDoc, got MergedInput");
        assert_eq!(err.kind(), "InvalidInput");

        let err = AgentError::failed("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), "Failed");
    }

    #[test]
    fn test_definition_error_messages() {
        let err = DefinitionError::MissingDependency {
            step: "edit".into(),
            dependency: "draft".into(),
        };
        assert!(err.to_string().contains("edit"));
        assert!(err.to_string().contains("draft"));
    }
}
