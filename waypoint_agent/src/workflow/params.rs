//! Parameter substitution.
//!
//! Turns a step's binding map into the concrete JSON object handed to the
//! tool, reading initial inputs and terminal outputs of earlier steps.
//! Substitution is pure and never suspends.

use std::collections::HashMap;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};

use crate::workflow::definition::{ParamValue, StepKey};

/// Initial run parameters.
pub type RunInputs = Map<String, Value>;

/// Substitution failure for a single step.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("Unknown input parameter: {0}")]
    UnknownInput(String),

    /// The referenced step has no successful output
    #[error("No output available from step {0}")]
    MissingOutput(StepKey),

    #[error("Path '{path}' not found in output of step {step}")]
    PathNotFound { step: StepKey, path: String },
}

/// A `{{source.path}}` placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateRef {
    /// `input` or a step key
    pub source: String,
    /// Dotted path below the source, possibly empty
    pub path: String,
}

fn placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+)((?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").ok()
    })
    .as_ref()
}

/// Lists placeholders in a template, in order of appearance.
pub fn template_refs(template: &str) -> Vec<TemplateRef> {
    let Some(re) = placeholder_regex() else {
        return Vec::new();
    };
    re.captures_iter(template)
        .map(|caps| TemplateRef {
            source: caps[1].to_string(),
            path: caps
                .get(2)
                .map(|m| m.as_str().trim_start_matches('.').to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Follows a dotted path; numeric segments index arrays.
///
/// An empty path returns the value itself.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Read-only view of what a step may bind to.
#[derive(Clone, Copy, Debug)]
pub struct ParamContext<'a> {
    pub inputs: &'a RunInputs,
    pub outputs: &'a HashMap<StepKey, Value>,
}

impl<'a> ParamContext<'a> {
    pub fn new(inputs: &'a RunInputs, outputs: &'a HashMap<StepKey, Value>) -> Self {
        Self { inputs, outputs }
    }

    fn input(&self, path: &str) -> Result<&'a Value, ParamError> {
        let (name, rest) = path.split_once('.').unwrap_or((path, ""));
        let value = self
            .inputs
            .get(name)
            .ok_or_else(|| ParamError::UnknownInput(name.to_string()))?;
        lookup_path(value, rest).ok_or_else(|| ParamError::UnknownInput(path.to_string()))
    }

    fn output(&self, step: &StepKey, path: &str) -> Result<&'a Value, ParamError> {
        let output = self
            .outputs
            .get(step)
            .ok_or_else(|| ParamError::MissingOutput(step.clone()))?;
        lookup_path(output, path).ok_or_else(|| ParamError::PathNotFound {
            step: step.clone(),
            path: path.to_string(),
        })
    }

    /// Resolves one binding.
    pub fn resolve(&self, param: &ParamValue) -> Result<Value, ParamError> {
        match param {
            ParamValue::Literal(v) => Ok(v.clone()),
            ParamValue::Input { name } => self.input(name).cloned(),
            ParamValue::StepOutput { step, path } => self.output(step, path).cloned(),
            ParamValue::Template(t) => self.render(t).map(Value::String),
        }
    }

    /// Renders a template. Strings are inserted verbatim, other values as JSON.
    pub fn render(&self, template: &str) -> Result<String, ParamError> {
        let Some(re) = placeholder_regex() else {
            return Ok(template.to_string());
        };
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;

        for caps in re.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            let source = &caps[1];
            let path = caps
                .get(2)
                .map(|m| m.as_str().trim_start_matches('.'))
                .unwrap_or_default();

            let value = if source == "input" {
                self.input(path)?
            } else {
                self.output(&StepKey::new(source), path)?
            };

            rendered.push_str(&template[last..whole.start()]);
            match value {
                Value::String(s) => rendered.push_str(s),
                other => rendered.push_str(&other.to_string()),
            }
            last = whole.end();
        }

        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Resolves a whole binding map into a JSON object.
    pub fn substitute(&self, params: &IndexMap<String, ParamValue>) -> Result<Value, ParamError> {
        let mut resolved = Map::with_capacity(params.len());
        for (name, param) in params {
            resolved.insert(name.clone(), self.resolve(param)?);
        }
        Ok(Value::Object(resolved))
    }
}
