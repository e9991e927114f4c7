//! Fluent builder API for workflow definitions.
//!
//! Provides a chainable API for declaring phases, steps and parameter
//! bindings in code. Dependency validation happens later, in
//! [`resolve`](crate::workflow::dag::resolve).

use indexmap::IndexMap;

use crate::workflow::definition::{
    CompletionRule, ExecutionMode, ParamValue, PhaseDefinition, StepDefinition, WorkflowDefinition,
};
use crate::workflow::WorkflowError;

/// Fluent builder for constructing workflow definitions.
///
/// Steps are appended to the most recently opened phase; parameters to the
/// most recently added step.
///
/// # Example
///
/// ```ignore
/// use waypoint_agent::workflow::{ParamValue, WorkflowBuilder};
///
/// let definition = WorkflowBuilder::new("topic-research")
///     .phase("collect")
///     .step("search", "web_search")
///     .param("query", ParamValue::input("topic"))
///     .step("trends", "keyword_trends")
///     .param("keyword", ParamValue::input("topic"))
///     .phase("enrich")
///     .step("scrape", "scrape_page")
///     .param("url", ParamValue::output("search", "results.0.url"))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    phases: Vec<PhaseDefinition>,
    completion: Option<CompletionRule>,
    /// First misuse encountered, reported by `build`
    error: Option<String>,
}

impl WorkflowBuilder {
    /// Creates a builder for a named workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            phases: Vec::new(),
            completion: None,
            error: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Opens a new phase. Following steps are added to it.
    pub fn phase(mut self, name: impl Into<String>) -> Self {
        self.phases.push(PhaseDefinition {
            name: name.into(),
            steps: Vec::new(),
        });
        self
    }

    /// Adds a parallel step to the current phase.
    ///
    /// # Arguments
    ///
    /// * `key` - Unique step key
    /// * `tool` - Registered tool name
    pub fn step(self, key: &str, tool: &str) -> Self {
        self.push_step(StepDefinition::new(key, tool))
    }

    /// Adds a step ordered after every earlier step of the current phase.
    pub fn sequential_step(self, key: &str, tool: &str) -> Self {
        let mut step = StepDefinition::new(key, tool);
        step.mode = ExecutionMode::Sequential;
        self.push_step(step)
    }

    /// Binds a parameter of the most recently added step.
    pub fn param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        let name = name.into();
        match self.phases.last_mut().and_then(|p| p.steps.last_mut()) {
            Some(step) => {
                step.params.insert(name, value);
            }
            None => self.record_error(format!("param '{}' declared before any step", name)),
        }
        self
    }

    /// Replaces all parameters of the most recently added step.
    pub fn params(mut self, params: IndexMap<String, ParamValue>) -> Self {
        match self.phases.last_mut().and_then(|p| p.steps.last_mut()) {
            Some(step) => step.params = params,
            None => self.record_error("params declared before any step".to_string()),
        }
        self
    }

    /// Sets the roadmap credit applied after a non-failed run.
    pub fn completion(mut self, rule: CompletionRule) -> Self {
        self.completion = Some(rule);
        self
    }

    /// Builds the definition.
    ///
    /// # Returns
    ///
    /// - `Ok(WorkflowDefinition)` if at least one phase was declared
    /// - `Err(WorkflowError::EmptyWorkflow)` if no phase was declared
    /// - `Err(WorkflowError::InvalidDefinition)` for builder misuse
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        if let Some(reason) = self.error {
            return Err(WorkflowError::InvalidDefinition(reason));
        }
        if self.phases.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }
        Ok(WorkflowDefinition {
            name: self.name,
            description: self.description,
            phases: self.phases,
            completion: self.completion,
        })
    }

    fn push_step(mut self, step: StepDefinition) -> Self {
        match self.phases.last_mut() {
            Some(phase) => phase.steps.push(step),
            None => self.record_error(format!("step '{}' declared before any phase", step.key)),
        }
        self
    }

    fn record_error(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }
}
