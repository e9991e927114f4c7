//! Static workflow definitions.
//!
//! A definition is an ordered list of phases; each phase holds steps that
//! call one tool with a parameter map. Parameters are either literals or
//! bindings to the run's initial inputs and to earlier steps' outputs.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use waypoint_core::Pillar;

use crate::workflow::params::template_refs;

/// Unique identifier of a step within a workflow definition.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(String);

impl StepKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StepKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StepKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single parameter binding.
///
/// In YAML or JSON the binding forms are single-purpose objects:
///
/// ```yaml
/// keyword: { input: topic }
/// url: { from: search, path: results.0.url }
/// prompt: { template: "Summarise {{scrape.title}} for {{input.audience}}" }
/// limit: 10
/// ```
///
/// Anything that is not exactly one of those shapes is a literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ParamValue {
    /// Passed through unchanged
    Literal(Value),
    /// An initial run parameter
    Input { name: String },
    /// A field of an earlier step's output; empty path means the whole output
    StepOutput { step: StepKey, path: String },
    /// String with `{{input.name}}` / `{{step.path}}` placeholders
    Template(String),
}

impl ParamValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn input(name: impl Into<String>) -> Self {
        ParamValue::Input { name: name.into() }
    }

    pub fn output(step: impl Into<StepKey>, path: impl Into<String>) -> Self {
        ParamValue::StepOutput {
            step: step.into(),
            path: path.into(),
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        ParamValue::Template(template.into())
    }

    /// Steps whose outputs this binding reads.
    pub fn step_refs(&self) -> Vec<StepKey> {
        match self {
            ParamValue::StepOutput { step, .. } => vec![step.clone()],
            ParamValue::Template(t) => template_refs(t)
                .into_iter()
                .filter(|r| r.source != "input")
                .map(|r| StepKey::new(r.source))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Initial parameters this binding reads.
    pub fn input_refs(&self) -> Vec<String> {
        match self {
            ParamValue::Input { name } => vec![name.clone()],
            ParamValue::Template(t) => template_refs(t)
                .into_iter()
                .filter(|r| r.source == "input")
                .filter_map(|r| r.path.split('.').next().map(str::to_string))
                .filter(|name| !name.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn single_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    if map.len() != 1 {
        return None;
    }
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        let Value::Object(map) = &value else {
            return ParamValue::Literal(value);
        };

        if let Some(name) = single_string(map, "input") {
            return ParamValue::Input { name };
        }
        if let Some(template) = single_string(map, "template") {
            return ParamValue::Template(template);
        }

        let only_ref_keys = map.keys().all(|k| k == "from" || k == "path");
        if only_ref_keys {
            let step = map.get("from").and_then(Value::as_str);
            let path = match map.get("path") {
                None => Some(""),
                Some(p) => p.as_str(),
            };
            if let (Some(step), Some(path)) = (step, path) {
                return ParamValue::output(step, path);
            }
        }

        ParamValue::Literal(value)
    }
}

impl From<ParamValue> for Value {
    fn from(param: ParamValue) -> Self {
        match param {
            ParamValue::Literal(v) => v,
            ParamValue::Input { name } => serde_json::json!({ "input": name }),
            ParamValue::StepOutput { step, path } if path.is_empty() => {
                serde_json::json!({ "from": step.into_inner() })
            }
            ParamValue::StepOutput { step, path } => {
                serde_json::json!({ "from": step.into_inner(), "path": path })
            }
            ParamValue::Template(t) => serde_json::json!({ "template": t }),
        }
    }
}

/// How a step is ordered relative to its phase siblings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs as soon as its bindings are satisfied
    #[default]
    Parallel,
    /// Runs after every step declared before it in the same phase
    Sequential,
}

/// One tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub key: StepKey,
    pub tool: String,
    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl StepDefinition {
    pub fn new(key: impl Into<StepKey>, tool: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tool: tool.into(),
            params: IndexMap::new(),
            mode: ExecutionMode::Parallel,
        }
    }

    /// Steps referenced by this step's bindings, deduplicated in first-seen order.
    pub fn dependencies(&self) -> Vec<StepKey> {
        let mut deps: Vec<StepKey> = Vec::new();
        for param in self.params.values() {
            for dep in param.step_refs() {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        deps
    }
}

/// Ordered group of steps. Phase boundaries are join points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

/// Roadmap credit granted when a workflow run does not fail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRule {
    pub task_key: String,
    #[serde(default = "default_completion_category")]
    pub category: String,
    pub pillar: Pillar,
    /// Progress increment for `pillar`
    #[serde(default = "default_completion_progress")]
    pub progress: u8,
}

fn default_completion_category() -> String {
    "workflow".to_string()
}

fn default_completion_progress() -> u8 {
    25
}

/// Static description of a multi-phase pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub phases: Vec<PhaseDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionRule>,
}

impl WorkflowDefinition {
    /// Iterates over all steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    pub fn step(&self, key: &StepKey) -> Option<&StepDefinition> {
        self.steps().find(|s| &s.key == key)
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}
