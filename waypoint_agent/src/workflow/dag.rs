//! Dependency resolution using petgraph.
//!
//! Each phase is resolved independently into batches: every step in batch N
//! depends only on steps in earlier batches of the same phase or on steps in
//! earlier phases. Resolution is pure and happens before any dispatch.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::workflow::definition::{ExecutionMode, PhaseDefinition, StepKey, WorkflowDefinition};
use crate::workflow::WorkflowError;

/// Batches of one phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhasePlan {
    pub name: String,
    /// Steps per batch, in declaration order within each batch
    pub batches: Vec<Vec<StepKey>>,
}

/// Validated execution order for a whole definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub phases: Vec<PhasePlan>,
    /// Effective dependencies of each step (bindings plus sequential ordering)
    dependencies: HashMap<StepKey, Vec<StepKey>>,
    required_inputs: Vec<String>,
}

impl ExecutionPlan {
    /// Initial parameters the definition reads, in first-seen order.
    pub fn required_inputs(&self) -> &[String] {
        &self.required_inputs
    }

    /// Effective dependencies of a step.
    pub fn dependencies(&self, step: &StepKey) -> &[StepKey] {
        self.dependencies.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of batches across phases.
    pub fn batch_count(&self) -> usize {
        self.phases.iter().map(|p| p.batches.len()).sum()
    }
}

/// Resolves a definition into an execution plan.
///
/// # Returns
///
/// - `Err(WorkflowError::EmptyWorkflow)` / `EmptyPhase` for missing content
/// - `Err(WorkflowError::DuplicateStep)` if a key is reused
/// - `Err(WorkflowError::MissingDependency)` for references to unknown steps
/// - `Err(WorkflowError::ForwardReference)` for references into later phases
/// - `Err(WorkflowError::CycleDetected)` for cycles within a phase
pub fn resolve(definition: &WorkflowDefinition) -> Result<ExecutionPlan, WorkflowError> {
    if definition.phases.is_empty() {
        return Err(WorkflowError::EmptyWorkflow);
    }

    // Phase index of every step
    let mut phase_of: HashMap<StepKey, usize> = HashMap::new();
    for (index, phase) in definition.phases.iter().enumerate() {
        if phase.steps.is_empty() {
            return Err(WorkflowError::EmptyPhase(phase.name.clone()));
        }
        for step in &phase.steps {
            if phase_of.insert(step.key.clone(), index).is_some() {
                return Err(WorkflowError::DuplicateStep(step.key.clone()));
            }
        }
    }

    let mut dependencies = HashMap::new();
    let mut required_inputs: Vec<String> = Vec::new();
    let mut phases = Vec::with_capacity(definition.phases.len());

    for (index, phase) in definition.phases.iter().enumerate() {
        for step in &phase.steps {
            for param in step.params.values() {
                for input in param.input_refs() {
                    if !required_inputs.contains(&input) {
                        required_inputs.push(input);
                    }
                }
            }

            for dep in step.dependencies() {
                match phase_of.get(&dep) {
                    None => return Err(WorkflowError::MissingDependency(dep)),
                    Some(&dep_phase) if dep_phase > index => {
                        return Err(WorkflowError::ForwardReference {
                            step: step.key.clone(),
                            target: dep,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let (plan, phase_deps) = resolve_phase(phase)?;
        dependencies.extend(phase_deps);
        phases.push(plan);
    }

    Ok(ExecutionPlan {
        phases,
        dependencies,
        required_inputs,
    })
}

/// Effective dependencies of each step in a phase.
fn effective_dependencies(phase: &PhaseDefinition) -> HashMap<StepKey, Vec<StepKey>> {
    let mut deps = HashMap::new();
    for (position, step) in phase.steps.iter().enumerate() {
        let mut step_deps = step.dependencies();
        if step.mode == ExecutionMode::Sequential {
            for earlier in &phase.steps[..position] {
                if !step_deps.contains(&earlier.key) {
                    step_deps.push(earlier.key.clone());
                }
            }
        }
        deps.insert(step.key.clone(), step_deps);
    }
    deps
}

fn resolve_phase(
    phase: &PhaseDefinition,
) -> Result<(PhasePlan, HashMap<StepKey, Vec<StepKey>>), WorkflowError> {
    let deps = effective_dependencies(phase);

    let mut graph: DiGraph<StepKey, ()> = DiGraph::new();
    let mut nodes: HashMap<StepKey, NodeIndex> = HashMap::new();
    for step in &phase.steps {
        nodes.insert(step.key.clone(), graph.add_node(step.key.clone()));
    }

    // Edge dep -> step, only for dependencies inside this phase
    for step in &phase.steps {
        let to = nodes[&step.key];
        for dep in deps.get(&step.key).into_iter().flatten() {
            if let Some(&from) = nodes.get(dep) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let order = toposort(&graph, None)
        .map_err(|_| WorkflowError::CycleDetected(cycle_members(&graph)))?;

    // Batch index = length of the longest in-phase chain ending at the step
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();
    for node in &order {
        let depth = graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .filter_map(|pred| level.get(&pred))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level.insert(*node, depth);
    }

    let batch_count = level.values().copied().max().map_or(0, |m| m + 1);
    let mut batches: Vec<Vec<StepKey>> = vec![Vec::new(); batch_count];
    for step in &phase.steps {
        let batch = level[&nodes[&step.key]];
        batches[batch].push(step.key.clone());
    }

    Ok((
        PhasePlan {
            name: phase.name.clone(),
            batches,
        },
        deps,
    ))
}

/// Steps that sit on a cycle, in graph order.
fn cycle_members(graph: &DiGraph<StepKey, ()>) -> Vec<StepKey> {
    let self_loops: HashSet<NodeIndex> = graph
        .node_indices()
        .filter(|&n| graph.contains_edge(n, n))
        .collect();

    let mut members: Vec<StepKey> = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|n| self_loops.contains(n)))
        .flatten()
        .filter_map(|idx| graph.node_weight(idx).cloned())
        .collect();
    members.sort();
    members
}
