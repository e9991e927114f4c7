//! Command-line interface for Waypoint.
//!
//! # Examples
//!
//! Validate a workflow and show its batches:
//!
//! ```bash
//! $ waypoint plan workflows/topic-research.yaml
//! $ waypoint plan competitor_audit
//! ```
//!
//! Show the next suggestions for a pillar:
//!
//! ```bash
//! $ waypoint suggest --pillar gap_analysis --completed gap_competitor_audit --topic "home office"
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use waypoint_core::Pillar;
use waypoint_runtime::telemetry::init_telemetry;
use waypoint_runtime::RuntimeConfig;

use crate::suggest::{Suggestion, SuggestionEngine, TemplateTable};
use crate::workflow::{
    builtin_workflow, load_definition_from_file, resolve, ExecutionPlan, WorkflowDefinition,
};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about = "Guided workflow and suggestion core")]
pub struct Cli {
    /// Runtime configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub action: Action,
}

/// Actions available via CLI.
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Validate a workflow definition and print its execution plan
    Plan {
        /// Path to a workflow YAML file, or the name of a builtin workflow
        workflow: PathBuf,
    },

    /// Print the best suggestion per category for a pillar
    Suggest {
        #[arg(long, default_value = "discovery")]
        pillar: String,

        /// Task keys already completed (repeatable)
        #[arg(long = "completed")]
        completed: Vec<String>,

        /// Topic substituted into the suggestions
        #[arg(long)]
        topic: Option<String>,

        /// Custom template table (YAML) instead of the builtin one
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

/// Entry point for the CLI.
pub async fn run() -> anyhow::Result<()> {
    execute(Cli::parse()).await
}

/// Runs parsed arguments.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).await?,
        None => RuntimeConfig::default(),
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.as_str().to_string());
    init_telemetry(&level);

    match cli.action {
        Action::Plan { workflow } => {
            let definition = load_workflow(&workflow).await?;
            let plan = resolve(&definition)?;
            print!("{}", render_plan(&definition, &plan));
        }

        Action::Suggest {
            pillar,
            completed,
            topic,
            templates,
        } => {
            let pillar: Pillar = pillar.parse()?;
            let table = match templates {
                Some(path) => TemplateTable::from_yaml_str(&tokio::fs::read_to_string(path).await?)?,
                None => TemplateTable::builtin(),
            };
            let completed: HashSet<String> = completed.into_iter().collect();
            let suggestions = SuggestionEngine::new(table).suggest(pillar, &completed, topic.as_deref());
            print!("{}", render_suggestions(pillar, &suggestions));
        }
    }

    Ok(())
}

/// Loads a workflow file, falling back to a builtin of that name when no
/// such file exists.
pub async fn load_workflow(workflow: &Path) -> anyhow::Result<WorkflowDefinition> {
    if tokio::fs::try_exists(workflow).await? {
        return Ok(load_definition_from_file(workflow).await?);
    }
    match workflow.to_str() {
        Some(name) => Ok(builtin_workflow(name)?),
        None => anyhow::bail!("workflow not found: {}", workflow.display()),
    }
}

/// Human-readable execution plan.
pub fn render_plan(definition: &WorkflowDefinition, plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Workflow: {} ({} steps, {} batches)",
        definition.name,
        definition.step_count(),
        plan.batch_count()
    );
    if !plan.required_inputs().is_empty() {
        let _ = writeln!(out, "Inputs: {}", plan.required_inputs().join(", "));
    }
    for (index, phase) in plan.phases.iter().enumerate() {
        let _ = writeln!(out, "Phase {}: {}", index + 1, phase.name);
        for (batch_index, batch) in phase.batches.iter().enumerate() {
            let steps: Vec<String> = batch
                .iter()
                .map(|key| match definition.step(key) {
                    Some(step) => format!("{} [{}]", key, step.tool),
                    None => key.to_string(),
                })
                .collect();
            let _ = writeln!(out, "  batch {}: {}", batch_index + 1, steps.join(", "));
        }
    }
    out
}

/// Human-readable suggestion list.
pub fn render_suggestions(pillar: Pillar, suggestions: &[Suggestion]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pillar: {}", pillar.label());
    if suggestions.is_empty() {
        let _ = writeln!(out, "  nothing left to suggest");
    }
    for suggestion in suggestions {
        let _ = writeln!(
            out,
            "  [{}] {} ({})",
            suggestion.category.as_str(),
            suggestion.title,
            suggestion.task_key
        );
    }
    out
}
