//! Workflow execution engine.
//!
//! Runs a resolved definition phase by phase and batch by batch. Every
//! batch is a join point: all of its steps reach a terminal state before
//! the next batch is considered. Steps whose bound inputs did not succeed
//! are skipped rather than attempted.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;
use waypoint_core::{CacheStore, Payload, ToolCache, VolatilityClass};
use waypoint_runtime::{MetricKind, RuntimeConfig, RuntimeMetrics};

use crate::workflow::cancellation::{CancellationToken, CancellationTokenSource};
use crate::workflow::dag::{resolve, ExecutionPlan};
use crate::workflow::definition::{StepKey, WorkflowDefinition};
use crate::workflow::params::{ParamContext, RunInputs};
use crate::workflow::state::{
    RunFailure, RunStatus, SkipReason, StepResult, StepStatus, TransitionError, WorkflowRun,
};
use crate::workflow::timeout::TimeoutConfig;
use crate::workflow::tools::{RetryPolicy, ToolError, ToolExecutor, ToolRegistry};
use crate::workflow::WorkflowError;

/// Default cap on concurrently dispatched steps.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// How a dispatched step ended.
#[derive(Debug)]
enum Dispatch {
    Succeeded {
        output: Payload,
        attempts: u32,
        from_cache: bool,
    },
    Failed {
        error: String,
        attempts: u32,
    },
    /// The run was cancelled or timed out while the step waited or ran
    Interrupted,
}

/// Drives workflow runs through the resolver, cache and tool executor.
///
/// The engine is cheap to clone; clones share the executor, cache,
/// metrics and concurrency limit.
#[derive(Clone, Debug)]
pub struct WorkflowEngine {
    executor: ToolExecutor,
    cache: ToolCache,
    metrics: RuntimeMetrics,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
    run_timeout: Option<Duration>,
}

impl WorkflowEngine {
    /// Creates an engine.
    ///
    /// The executor is switched over to `metrics` so tool calls and step
    /// outcomes are counted in one place. The run timeout starts out as the
    /// executor's configured one.
    pub fn new(executor: ToolExecutor, cache: ToolCache, metrics: RuntimeMetrics) -> Self {
        let run_timeout = executor.timeouts().run_timeout;
        Self {
            executor: executor.with_metrics(metrics.clone()),
            cache,
            metrics,
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            run_timeout,
        }
    }

    /// Builds an engine from runtime configuration.
    ///
    /// # Arguments
    ///
    /// * `registry` - Tools available to workflows
    /// * `cache_store` - Backend for the tool result cache
    /// * `config` - Retry, timeout, cache and concurrency settings
    pub fn from_config(
        registry: ToolRegistry,
        cache_store: Arc<dyn CacheStore>,
        config: &RuntimeConfig,
    ) -> Self {
        let executor = ToolExecutor::new(registry)
            .with_retry(RetryPolicy::from(&config.retry))
            .with_timeouts(TimeoutConfig::from(&config.timeouts));
        let cache = ToolCache::new(cache_store, config.cache.ttl_policy());
        Self::new(executor, cache, RuntimeMetrics::new())
            .with_max_concurrency(config.engine.max_concurrency)
    }

    /// Caps the number of steps in flight at once (minimum 1).
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.limiter = Arc::new(Semaphore::new(max));
        self.max_concurrency = max;
        self
    }

    /// Bounds a whole run. Per-call timeouts still apply inside it.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// Runs a workflow to completion.
    ///
    /// # Arguments
    ///
    /// * `definition` - Workflow to run
    /// * `inputs` - Initial parameters, a JSON object (or null for none)
    ///
    /// # Returns
    ///
    /// - `Ok(WorkflowRun)` - Once every step is terminal, whatever the outcome
    /// - `Err(WorkflowError)` - If the definition or inputs are invalid; nothing
    ///   was dispatched
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        inputs: Value,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.run_with_cancellation(definition, inputs, CancellationToken::none())
            .await
    }

    /// Runs a workflow that can be cancelled from outside.
    ///
    /// Cancelling `token` skips every step that is not yet terminal; steps
    /// that already finished keep their results.
    pub async fn run_with_cancellation(
        &self,
        definition: &WorkflowDefinition,
        inputs: Value,
        token: CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let plan = resolve(definition)?;
        let inputs = initial_inputs(inputs)?;
        for name in plan.required_inputs() {
            let root = name.split('.').next().unwrap_or(name);
            if !inputs.contains_key(root) {
                return Err(WorkflowError::MissingInput(root.to_string()));
            }
        }

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %run_id,
            workflow = %definition.name
        );
        Ok(self
            .drive(definition, &plan, inputs, token, run_id)
            .instrument(span)
            .await)
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        plan: &ExecutionPlan,
        inputs: RunInputs,
        outer: CancellationToken,
        run_id: Uuid,
    ) -> WorkflowRun {
        let mut run = WorkflowRun::new(run_id, definition.name.clone());
        for step in definition.steps() {
            run.steps
                .insert(step.key.clone(), StepResult::pending(step.key.clone(), &step.tool));
        }
        run.status = RunStatus::Running;
        tracing::info!(
            steps = run.steps.len(),
            batches = plan.batch_count(),
            "workflow run started"
        );

        let internal = CancellationTokenSource::new();
        let interrupt: Arc<OnceLock<RunFailure>> = Arc::new(OnceLock::new());
        if outer.is_cancelled() {
            let _ = interrupt.set(RunFailure::Cancelled);
            internal.cancel();
        }
        let watcher = tokio::spawn(watch(
            outer,
            self.run_timeout,
            internal.clone(),
            Arc::clone(&interrupt),
        ));
        let token = internal.token();

        let mut outputs: HashMap<StepKey, Value> = HashMap::new();

        'phases: for phase in &plan.phases {
            tracing::debug!(phase = %phase.name, batches = phase.batches.len(), "entering phase");
            for batch in &phase.batches {
                if token.is_cancelled() {
                    break 'phases;
                }
                self.run_batch(definition, batch, &inputs, &mut outputs, &mut run, &token, &interrupt)
                    .await;
            }
        }

        watcher.abort();

        let interrupted = interrupt.get().cloned();
        if let Some(failure) = &interrupted {
            let reason = skip_reason(failure);
            let pending: Vec<StepKey> = run
                .steps
                .iter()
                .filter(|(_, r)| !r.status().is_terminal())
                .map(|(k, _)| k.clone())
                .collect();
            for key in pending {
                transition(&mut run, &key, |r| r.skip(reason.clone()));
                self.metrics.record(MetricKind::StepSkipped);
            }
        }

        run.finish(interrupted);
        tracing::info!(
            status = ?run.status,
            succeeded = run.steps_with(StepStatus::Succeeded).len(),
            failed = run.steps_with(StepStatus::Failed).len(),
            skipped = run.steps_with(StepStatus::Skipped).len(),
            "workflow run finished"
        );
        run
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        definition: &WorkflowDefinition,
        batch: &[StepKey],
        inputs: &RunInputs,
        outputs: &mut HashMap<StepKey, Value>,
        run: &mut WorkflowRun,
        token: &CancellationToken,
        interrupt: &OnceLock<RunFailure>,
    ) {
        let mut tasks = JoinSet::new();

        for key in batch {
            let Some(step) = definition.step(key) else {
                continue;
            };

            let blocked = step.dependencies().into_iter().find(|dep| {
                run.steps.get(dep).map(StepResult::status) != Some(StepStatus::Succeeded)
            });
            if let Some(dep) = blocked {
                tracing::debug!(step = %key, upstream = %dep, "skipping step, upstream did not succeed");
                transition(run, key, |r| r.skip(SkipReason::UpstreamFailed(dep)));
                self.metrics.record(MetricKind::StepSkipped);
                continue;
            }

            let params = match ParamContext::new(inputs, outputs).substitute(&step.params) {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!(step = %key, error = %e, "parameter substitution failed");
                    transition(run, key, |r| r.fail(e.to_string(), 0));
                    self.metrics.record(MetricKind::StepFailed);
                    continue;
                }
            };

            transition(run, key, StepResult::start);
            let volatility = self
                .executor
                .spec(&step.tool)
                .map(|spec| spec.volatility)
                .unwrap_or(VolatilityClass::Volatile);

            let engine = self.clone();
            let key = key.clone();
            let tool = step.tool.clone();
            let token = token.clone();
            tasks.spawn(
                async move {
                    let outcome = engine.dispatch(&key, &tool, params, volatility, &token).await;
                    (key, outcome)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            let (key, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!(error = %e, "step task did not complete");
                    continue;
                }
            };
            match outcome {
                Dispatch::Succeeded {
                    output,
                    attempts,
                    from_cache,
                } => {
                    outputs.insert(key.clone(), output.clone());
                    transition(run, &key, |r| r.succeed(output, attempts, from_cache));
                    self.metrics.record(MetricKind::StepSucceeded);
                }
                Dispatch::Failed { error, attempts } => {
                    transition(run, &key, |r| r.fail(error, attempts));
                    self.metrics.record(MetricKind::StepFailed);
                }
                Dispatch::Interrupted => {
                    let reason = interrupt
                        .get()
                        .map(skip_reason)
                        .unwrap_or(SkipReason::Cancelled);
                    transition(run, &key, |r| r.skip(reason));
                    self.metrics.record(MetricKind::StepSkipped);
                }
            }
        }

        // A task that panicked leaves its step running
        for key in batch {
            if run.steps.get(key).map(StepResult::status) == Some(StepStatus::Running) {
                transition(run, key, |r| r.fail("step task aborted", 0));
                self.metrics.record(MetricKind::StepFailed);
            }
        }
    }

    /// Cache-first dispatch of one step.
    async fn dispatch(
        &self,
        key: &StepKey,
        tool: &str,
        params: Value,
        volatility: VolatilityClass,
        token: &CancellationToken,
    ) -> Dispatch {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Dispatch::Interrupted,
            permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Dispatch::Interrupted,
            },
        };

        let cacheable = !self.cache.policy().ttl(volatility).is_zero();
        if cacheable {
            if let Some(output) = self.cache.get(tool, &params, volatility).await {
                tracing::debug!(step = %key, tool, "cache hit");
                self.metrics.record_cache_access(true);
                return Dispatch::Succeeded {
                    output,
                    attempts: 0,
                    from_cache: true,
                };
            }
            tracing::debug!(step = %key, tool, "cache miss");
            self.metrics.record_cache_access(false);
        }

        tracing::debug!(step = %key, tool, "dispatching step");
        match self.executor.execute(tool, &params, token).await {
            Ok(outcome) => {
                if cacheable {
                    if let Err(e) = self
                        .cache
                        .put(tool, &params, outcome.payload.clone(), volatility)
                        .await
                    {
                        tracing::warn!(step = %key, tool, error = %e, "cache write failed");
                    }
                }
                Dispatch::Succeeded {
                    output: outcome.payload,
                    attempts: outcome.attempts,
                    from_cache: false,
                }
            }
            Err(failure) if matches!(failure.error, ToolError::Cancelled) && token.is_cancelled() => {
                Dispatch::Interrupted
            }
            Err(failure) => {
                tracing::debug!(step = %key, tool, error = %failure, "step failed");
                Dispatch::Failed {
                    error: failure.error.to_string(),
                    attempts: failure.attempts,
                }
            }
        }
    }
}

/// Cancels `internal` once the outer token fires or the run timeout elapses,
/// recording which one happened first.
async fn watch(
    outer: CancellationToken,
    limit: Option<Duration>,
    internal: CancellationTokenSource,
    interrupt: Arc<OnceLock<RunFailure>>,
) {
    let deadline = async move {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = outer.cancelled() => {
            let _ = interrupt.set(RunFailure::Cancelled);
            tracing::info!("workflow run cancelled");
        }
        _ = deadline => {
            let after = limit.unwrap_or_default();
            let _ = interrupt.set(RunFailure::timed_out(after));
            tracing::warn!(?after, "workflow run timed out");
        }
    }
    internal.cancel();
}

fn skip_reason(failure: &RunFailure) -> SkipReason {
    match failure {
        RunFailure::TimedOut { .. } => SkipReason::TimedOut,
        _ => SkipReason::Cancelled,
    }
}

fn transition(
    run: &mut WorkflowRun,
    key: &StepKey,
    apply: impl FnOnce(&mut StepResult) -> Result<(), TransitionError>,
) {
    if let Some(result) = run.steps.get_mut(key) {
        if let Err(e) = apply(result) {
            tracing::warn!(error = %e, "ignored invalid step transition");
        }
    }
}

fn initial_inputs(inputs: Value) -> Result<RunInputs, WorkflowError> {
    match inputs {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(WorkflowError::InvalidInputs(
            match other {
                Value::Bool(_) => "a boolean",
                Value::Number(_) => "a number",
                Value::String(_) => "a string",
                _ => "an array",
            }
            .to_string(),
        )),
    }
}
