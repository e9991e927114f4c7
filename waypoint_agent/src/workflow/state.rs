//! Run and step state.
//!
//! A [`StepResult`] only moves forward: `Pending -> Running -> terminal`,
//! or straight from `Pending` to `Skipped`/`Failed`. Once terminal it is
//! immutable. The overall [`RunStatus`] is derived from the terminal step
//! results when the run finishes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waypoint_core::Payload;

use crate::workflow::definition::StepKey;

/// Status of an individual step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// Why a step never ran to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "step")]
pub enum SkipReason {
    /// A dependency did not succeed
    UpstreamFailed(StepKey),
    /// The run was cancelled
    Cancelled,
    /// The run timeout fired
    TimedOut,
}

/// Rejected state transition.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("step {step} cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub step: StepKey,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// Result of one step within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    step: StepKey,
    tool: String,
    status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<SkipReason>,
    attempts: u32,
    from_cache: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn pending(step: StepKey, tool: impl Into<String>) -> Self {
        Self {
            step,
            tool: tool.into(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            skip_reason: None,
            attempts: 0,
            from_cache: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn step(&self) -> &StepKey {
        &self.step
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn output(&self) -> Option<&Payload> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    /// Tool attempts made; zero for cache hits and steps that never ran.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn check(&self, to: StepStatus) -> Result<(), TransitionError> {
        let allowed = match (self.status, to) {
            (StepStatus::Pending, StepStatus::Running) => true,
            (StepStatus::Pending | StepStatus::Running, s) => s.is_terminal(),
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(TransitionError {
                step: self.step.clone(),
                from: self.status,
                to,
            })
        }
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.check(StepStatus::Running)?;
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(
        &mut self,
        output: Payload,
        attempts: u32,
        from_cache: bool,
    ) -> Result<(), TransitionError> {
        self.check(StepStatus::Succeeded)?;
        self.status = StepStatus::Succeeded;
        self.output = Some(output);
        self.attempts = attempts;
        self.from_cache = from_cache;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) -> Result<(), TransitionError> {
        self.check(StepStatus::Failed)?;
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn skip(&mut self, reason: SkipReason) -> Result<(), TransitionError> {
        self.check(StepStatus::Skipped)?;
        self.status = StepStatus::Skipped;
        self.skip_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Overall status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Every step succeeded
    Succeeded,
    /// Some step failed without blocking any other step
    PartiallyFailed,
    /// A failure blocked a consumer, the run was interrupted, or nothing succeeded
    Failed,
}

/// Why a run ended as [`RunStatus::Failed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunFailure {
    /// A failed step blocked a later consumer
    Blocked { step: StepKey, error: String },
    Cancelled,
    TimedOut { after_ms: u64 },
    NoStepSucceeded,
}

impl RunFailure {
    pub fn timed_out(after: Duration) -> Self {
        RunFailure::TimedOut {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A single execution of a workflow definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    /// Step results in declaration order
    pub steps: IndexMap<StepKey, StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(run_id: Uuid, workflow: impl Into<String>) -> Self {
        Self {
            run_id,
            workflow: workflow.into(),
            status: RunStatus::Pending,
            steps: IndexMap::new(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step(&self, key: &str) -> Option<&StepResult> {
        self.steps.get(&StepKey::new(key))
    }

    /// Outputs of every succeeded step.
    pub fn outputs(&self) -> HashMap<StepKey, Payload> {
        self.steps
            .iter()
            .filter_map(|(k, r)| r.output().map(|o| (k.clone(), o.clone())))
            .collect()
    }

    pub fn steps_with(&self, status: StepStatus) -> Vec<&StepKey> {
        self.steps
            .iter()
            .filter(|(_, r)| r.status() == status)
            .map(|(k, _)| k)
            .collect()
    }

    /// True unless the run failed.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded | RunStatus::PartiallyFailed)
    }

    /// Follows skip reasons back to the step that actually failed.
    fn root_failure<'a>(&'a self, mut key: &'a StepKey) -> Option<&'a StepResult> {
        for _ in 0..=self.steps.len() {
            let result = self.steps.get(key)?;
            match result.skip_reason() {
                Some(SkipReason::UpstreamFailed(upstream)) => key = upstream,
                _ => return Some(result),
            }
        }
        None
    }

    /// Derives the final status from terminal step results.
    pub(crate) fn finish(&mut self, interrupted: Option<RunFailure>) {
        self.finished_at = Some(Utc::now());

        if let Some(failure) = interrupted {
            self.status = RunStatus::Failed;
            self.failure = Some(failure);
            return;
        }

        let blocked = self.steps.values().find_map(|r| match r.skip_reason() {
            Some(SkipReason::UpstreamFailed(upstream)) => Some(upstream),
            _ => None,
        });
        if let Some(upstream) = blocked {
            let (step, error) = match self.root_failure(upstream) {
                Some(root) => (
                    root.step().clone(),
                    root.error().unwrap_or("did not succeed").to_string(),
                ),
                None => (upstream.clone(), "did not succeed".to_string()),
            };
            self.status = RunStatus::Failed;
            self.failure = Some(RunFailure::Blocked { step, error });
            return;
        }

        let any_succeeded = self.steps.values().any(|r| r.status() == StepStatus::Succeeded);
        if !any_succeeded {
            self.status = RunStatus::Failed;
            self.failure = Some(RunFailure::NoStepSucceeded);
            return;
        }

        let any_failed = self
            .steps
            .values()
            .any(|r| matches!(r.status(), StepStatus::Failed | StepStatus::Skipped));
        self.status = if any_failed {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        };
    }
}
