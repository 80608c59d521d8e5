//! Workflow definitions and the fluent builder that validates them.
//!
//! A workflow is a named collection of steps wired into a DAG by their
//! `after` sets. [`WorkflowBuilder::build`] validates the graph once
//! (dependency completeness, acyclicity) and computes a topological order;
//! the resulting [`WorkflowDefinition`] is frozen and can be shared between
//! executors.
//!
//! # Example
//!
//! ```rust,ignore
//! let workflow = WorkflowBuilder::new("publish")
//!     .step::<Draft>("draft", &[])
//!     .step::<Edit>("edit", &["draft"])
//!     .step::<Format>("format", &["edit"])
//!     .build()?;
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::agent::{short_type_name, Agent, AgentHandle, DynAgent};
use crate::types::{DefinitionError, DefinitionResult, StepName};

type AgentFactory = Arc<dyn Fn() -> Arc<dyn DynAgent> + Send + Sync>;

// ============================================================================
// STEP DEFINITION
// ============================================================================

/// One named position in a workflow: an agent type plus its upstream set.
///
/// Immutable after workflow validation. The factory captures the agent
/// type's `Default` constructor so the executor can build a fresh instance
/// per run unless an override is injected.
#[derive(Clone)]
pub struct StepDef {
    name: StepName,
    agent_name: &'static str,
    factory: AgentFactory,
    after: BTreeSet<StepName>,
    retries: Option<u32>,
}

impl StepDef {
    fn new<A>(
        name: StepName,
        after: BTreeSet<StepName>,
        retries: Option<u32>,
    ) -> Self
    where
        A: Agent + Default + 'static,
    {
        Self {
            name,
            agent_name: short_type_name::<A>(),
            factory: Arc::new(|| Arc::new(AgentHandle::new(A::default()))),
            after,
            retries,
        }
    }

    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Name of the step's agent type, matching [`AgentResult::agent`] for
    /// results produced by this step.
    ///
    /// [`AgentResult::agent`]: crate::agent::AgentResult
    pub fn agent_name(&self) -> &'static str {
        self.agent_name
    }

    /// Upstream step names this step waits on.
    pub fn after(&self) -> &BTreeSet<StepName> {
        &self.after
    }

    /// Per-step retry override, if any.
    pub fn retries(&self) -> Option<u32> {
        self.retries
    }

    /// Construct a fresh agent instance for this step.
    pub(crate) fn instantiate(&self) -> Arc<dyn DynAgent> {
        (self.factory)()
    }
}

impl fmt::Debug for StepDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDef")
            .field("name", &self.name)
            .field("agent", &self.agent_name)
            .field("after", &self.after)
            .field("retries", &self.retries)
            .finish()
    }
}

// ============================================================================
// WORKFLOW DEFINITION
// ============================================================================

/// A validated, frozen DAG of steps.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<StepDef>,
    index: HashMap<StepName, usize>,
    sorted: Vec<StepName>,
}

impl WorkflowDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&StepDef> {
        self.index.get(name).map(|i| &self.steps[*i])
    }

    /// Steps in definition order.
    pub fn steps(&self) -> impl Iterator<Item = &StepDef> {
        self.steps.iter()
    }

    /// Step names as strings, in definition order.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// A topologically valid order, computed once at validation time.
    ///
    /// Execution schedules by ready sets, not by this order; it exists for
    /// callers that want a deterministic linearization.
    pub fn sorted_steps(&self) -> &[StepName] {
        &self.sorted
    }

    /// Steps with no upstreams.
    pub fn roots(&self) -> impl Iterator<Item = &StepDef> {
        self.steps.iter().filter(|s| s.after().is_empty())
    }
}

// ============================================================================
// WORKFLOW BUILDER
// ============================================================================

/// Fluent builder for [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<StepDef>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step bound to agent type `A`, waiting on `after`.
    ///
    /// `after` is a set in spirit: order and repetition are irrelevant.
    pub fn step<A>(self, name: impl Into<StepName>, after: &[&str]) -> Self
    where
        A: Agent + Default + 'static,
    {
        self.push::<A>(name.into(), after, None)
    }

    /// Append a step with a per-step retry cap overriding the executor's.
    pub fn step_with_retries<A>(
        self,
        name: impl Into<StepName>,
        after: &[&str],
        retries: u32,
    ) -> Self
    where
        A: Agent + Default + 'static,
    {
        self.push::<A>(name.into(), after, Some(retries))
    }

    fn push<A>(mut self, name: StepName, after: &[&str], retries: Option<u32>) -> Self
    where
        A: Agent + Default + 'static,
    {
        let after: BTreeSet<StepName> = after.iter().map(|s| StepName::new(*s)).collect();
        self.steps.push(StepDef::new::<A>(name, after, retries));
        self
    }

    /// Validate the graph and freeze the definition.
    ///
    /// Checks, in order: duplicate step names, dependency completeness,
    /// acyclicity (depth-first, three colors). A topological order is then
    /// computed with Kahn's algorithm.
    pub fn build(self) -> DefinitionResult<WorkflowDefinition> {
        let mut index: HashMap<StepName, usize> = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.name().clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStep {
                    workflow: self.name,
                    step: step.name().clone(),
                });
            }
        }

        for step in &self.steps {
            for dep in step.after() {
                if !index.contains_key(dep) {
                    return Err(DefinitionError::MissingDependency {
                        step: step.name().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycles(&self.steps, &index)?;
        let sorted = topological_order(&self.steps, &index);

        Ok(WorkflowDefinition {
            name: self.name,
            steps: self.steps,
            index,
            sorted,
        })
    }
}

// ============================================================================
// GRAPH VALIDATION
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Unvisited,
    OnPath,
    Done,
}

/// Depth-first cycle check over the dependency edges.
///
/// A back-edge to a step still on the current path closes a cycle; the
/// error names that step.
fn detect_cycles(steps: &[StepDef], index: &HashMap<StepName, usize>) -> DefinitionResult<()> {
    let mut colors = vec![Color::Unvisited; steps.len()];
    for i in 0..steps.len() {
        if colors[i] == Color::Unvisited {
            visit(i, steps, index, &mut colors)?;
        }
    }
    Ok(())
}

fn visit(
    i: usize,
    steps: &[StepDef],
    index: &HashMap<StepName, usize>,
    colors: &mut [Color],
) -> DefinitionResult<()> {
    colors[i] = Color::OnPath;
    for dep in steps[i].after() {
        // Dependency completeness was checked before the traversal.
        let Some(&j) = index.get(dep) else { continue };
        match colors[j] {
            Color::OnPath => {
                return Err(DefinitionError::CircularDependency { step: dep.clone() });
            }
            Color::Unvisited => visit(j, steps, index, colors)?,
            Color::Done => {}
        }
    }
    colors[i] = Color::Done;
    Ok(())
}

/// Kahn's algorithm over in-degrees. Ties break in definition order.
fn topological_order(steps: &[StepDef], index: &HashMap<StepName, usize>) -> Vec<StepName> {
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.after().len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dep in step.after() {
            if let Some(&j) = index.get(dep) {
                dependents[j].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(steps.len());
    while let Some(i) = queue.pop_front() {
        sorted.push(steps[i].name().clone());
        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                queue.push_back(j);
            }
        }
    }
    sorted
}

// ============================================================================
// TESTS
// ============================================================================
