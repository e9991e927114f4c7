//! YAML workflow definitions.
//!
//! Loaded definitions are validated with the resolver before being
//! returned, so a successful load is always runnable.
//!
//! ```yaml
//! name: topic-research
//! completion:
//!   task_key: topic_research
//!   pillar: discovery
//!   progress: 25
//! phases:
//!   - name: collect
//!     steps:
//!       - key: search
//!         tool: web_search
//!         params:
//!           query: { input: topic }
//!       - key: trends
//!         tool: keyword_trends
//!         params:
//!           keyword: { input: topic }
//!   - name: enrich
//!     steps:
//!       - key: scrape
//!         tool: scrape_page
//!         params:
//!           url: { from: search, path: results.0.url }
//! ```

use std::path::Path;

use thiserror::Error;

use crate::workflow::dag::resolve;
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::WorkflowError;

/// Errors that can occur while loading a YAML definition.
#[derive(Error, Debug)]
pub enum YamlWorkflowError {
    /// Structurally valid YAML that does not describe a workflow
    #[error("Invalid workflow schema: {0}")]
    InvalidSchema(String),

    /// Definition parsed but failed validation
    #[error("Invalid workflow: {0}")]
    Definition(#[from] WorkflowError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Loads a workflow definition from a YAML file.
///
/// # Arguments
///
/// * `path` - Path to the YAML file
pub async fn load_definition_from_file(
    path: impl AsRef<Path>,
) -> Result<WorkflowDefinition, YamlWorkflowError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    load_definition_from_str(&content)
}

/// Loads a workflow definition from a YAML string.
///
/// # Returns
///
/// - `Ok(WorkflowDefinition)` - If the YAML parsed and the definition resolves
/// - `Err(YamlWorkflowError)` - Otherwise
pub fn load_definition_from_str(yaml: &str) -> Result<WorkflowDefinition, YamlWorkflowError> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml)?;
    if definition.name.trim().is_empty() {
        return Err(YamlWorkflowError::InvalidSchema(
            "workflow name must not be empty".to_string(),
        ));
    }
    if let Some(step) = definition.steps().find(|s| s.tool.trim().is_empty()) {
        return Err(YamlWorkflowError::InvalidSchema(format!(
            "step '{}' has no tool",
            step.key
        )));
    }
    resolve(&definition)?;
    Ok(definition)
}
