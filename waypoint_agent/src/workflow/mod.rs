//! Phase/step workflow orchestration.
//!
//! A [`WorkflowDefinition`] is an ordered list of phases, each holding steps
//! that invoke a named tool. Step parameters may bind to initial run inputs
//! or to outputs of earlier steps; those bindings are the dependency edges.
//!
//! # Architecture
//!
//! - [`resolve`](dag::resolve): validates a definition and splits every phase
//!   into batches of mutually independent steps
//! - [`ToolExecutor`]: invokes registered tools with timeout, cancellation
//!   and bounded retry
//! - [`WorkflowEngine`]: drives phases and batches, consults the tool cache,
//!   substitutes parameters and derives the final [`RunStatus`]
//!
//! # Example
//!
//! ```ignore
//! use waypoint_agent::workflow::{ParamValue, WorkflowBuilder};
//!
//! let definition = WorkflowBuilder::new("research")
//!     .phase("collect")
//!     .step("search", "web_search")
//!     .param("query", ParamValue::input("topic"))
//!     .step("trends", "keyword_trends")
//!     .param("keyword", ParamValue::input("topic"))
//!     .phase("enrich")
//!     .step("scrape", "scrape_page")
//!     .param("url", ParamValue::output("search", "results.0.url"))
//!     .build()?;
//!
//! let run = engine.run(&definition, json!({ "topic": "rust" })).await?;
//! ```
//!
//! # Failure model
//!
//! Definition problems are reported synchronously before anything is
//! dispatched. Tool failures never surface as errors; they are recorded on
//! the step, and steps consuming a failed step's output are skipped.

pub mod builder;
pub mod cancellation;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod library;
pub mod params;
pub mod state;
pub mod timeout;
pub mod tools;
pub mod yaml;

use thiserror::Error;

pub use builder::WorkflowBuilder;
pub use cancellation::{CancellationToken, CancellationTokenSource};
pub use dag::{resolve, ExecutionPlan, PhasePlan};
pub use definition::{
    CompletionRule, ExecutionMode, ParamValue, PhaseDefinition, StepDefinition, StepKey,
    WorkflowDefinition,
};
pub use executor::WorkflowEngine;
pub use library::{builtin_workflow, BUILTIN_WORKFLOWS};
pub use params::{ParamContext, ParamError, RunInputs};
pub use state::{RunFailure, RunStatus, SkipReason, StepResult, StepStatus, WorkflowRun};
pub use timeout::TimeoutConfig;
pub use tools::{
    FnTool, ParamKind, ParamSchema, RetryPolicy, Tool, ToolError, ToolExecutor, ToolFailure,
    ToolOutcome, ToolRegistry, ToolSpec,
};
pub use yaml::{load_definition_from_file, load_definition_from_str, YamlWorkflowError};

/// Errors reported before a run dispatches anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Cycle detected in the dependency graph of a phase
    #[error("Cycle detected in workflow involving steps: {0:?}")]
    CycleDetected(Vec<StepKey>),

    /// Binding refers to a step that does not exist
    #[error("Missing dependency: {0}")]
    MissingDependency(StepKey),

    /// Binding refers to a step in a later phase
    #[error("Step {step} references {target}, which runs in a later phase")]
    ForwardReference { step: StepKey, target: StepKey },

    #[error("Duplicate step key: {0}")]
    DuplicateStep(StepKey),

    /// Workflow is empty
    #[error("Workflow cannot be empty")]
    EmptyWorkflow,

    #[error("Phase '{0}' has no steps")]
    EmptyPhase(String),

    /// Initial input read by the definition but not supplied
    #[error("Missing initial input: {0}")]
    MissingInput(String),

    /// Initial inputs were not a JSON object
    #[error("Initial inputs must be an object, got {0}")]
    InvalidInputs(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// No builtin workflow has this name
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
