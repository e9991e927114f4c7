//! Tool registry and executor.
//!
//! Tools are opaque async capabilities (search, scrape, metrics lookup)
//! invoked by name. The registry is built once and shared read-only; the
//! executor validates parameters, applies timeouts, observes cancellation
//! and retries retryable failures with bounded exponential backoff.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use waypoint_core::{Payload, VolatilityClass};
use waypoint_runtime::{MetricKind, RetrySection, RuntimeMetrics};

use crate::workflow::cancellation::CancellationToken;
use crate::workflow::timeout::TimeoutConfig;

/// Failure of a single tool call.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not registered: {0}")]
    NotRegistered(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    /// Parameters do not satisfy the tool's schema
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Error status reported by the provider
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Tool call cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    Failed(String),
}

impl ToolError {
    /// Timeouts, rate limits and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Timeout(_) | ToolError::RateLimited(_) => true,
            ToolError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Expected JSON kind of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
}

impl ParamKind {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::Any => "any",
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Bool => "bool",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

/// Parameter shape a tool accepts.
///
/// Unknown parameters are allowed; declared ones are type-checked.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSchema {
    fields: Vec<(String, ParamKind, bool)>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.fields.push((name.into(), kind, true));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.fields.push((name.into(), kind, false));
        self
    }

    /// Checks a parameter object against the schema.
    pub fn validate(&self, params: &Value) -> Result<(), ToolError> {
        let Some(map) = params.as_object() else {
            return Err(ToolError::InvalidParams("parameters must be an object".to_string()));
        };

        for (name, kind, required) in &self.fields {
            match map.get(name) {
                None | Some(Value::Null) if *required => {
                    return Err(ToolError::InvalidParams(format!("missing required '{}'", name)));
                }
                Some(value) if !value.is_null() && !kind.matches(value) => {
                    return Err(ToolError::InvalidParams(format!(
                        "'{}' must be {}",
                        name,
                        kind.as_str()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Static description of a tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Selects the cache TTL band for results
    pub volatility: VolatilityClass,
    /// Per-call limit; falls back to the executor default
    pub timeout: Option<Duration>,
    pub schema: ParamSchema,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, volatility: VolatilityClass) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            volatility,
            timeout: None,
            schema: ParamSchema::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }
}

/// An external capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Performs the call. Long-running tools should watch `token`.
    async fn call(&self, params: Value, token: &CancellationToken) -> Result<Payload, ToolError>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Payload, ToolError>> + Send>>;

/// Adapts an async closure into a [`Tool`].
///
/// # Example
///
/// ```ignore
/// let echo = FnTool::new(
///     ToolSpec::new("echo", VolatilityClass::Volatile),
///     |params| async move { Ok(params) },
/// );
/// ```
pub struct FnTool {
    spec: ToolSpec,
    handler: Box<dyn Fn(Value) -> HandlerFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, ToolError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Box::new(move |params| Box::pin(handler(params))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, params: Value, _token: &CancellationToken) -> Result<Payload, ToolError> {
        (self.handler)(params).await
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("spec", &self.spec).finish()
    }
}

/// Immutable set of registered tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Builds a [`ToolRegistry`], rejecting duplicate names.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    /// Registers a tool.
    ///
    /// # Returns
    ///
    /// - `Err(ToolError::AlreadyRegistered)` if the name is taken
    pub fn register(self, tool: impl Tool + 'static) -> Result<Self, ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Result<Self, ToolError> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.tools.insert(name, tool);
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}

/// Bounded exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, counting the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Scales each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let grown = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let base = if grown.is_finite() && grown < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(grown.max(0.0))
        } else {
            self.max_delay
        };
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            base
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            backoff_factor: section.backoff_factor,
            jitter: section.jitter,
        }
    }
}

/// Successful call result.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub payload: Payload,
    /// Attempts made, counting the successful one
    pub attempts: u32,
}

/// Failed call result.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct ToolFailure {
    pub error: ToolError,
    pub attempts: u32,
}

impl ToolFailure {
    fn immediate(error: ToolError) -> Self {
        Self { error, attempts: 0 }
    }
}

/// Invokes registered tools with timeout, cancellation and retry handling.
#[derive(Clone, Debug)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    retry: RetryPolicy,
    timeouts: TimeoutConfig,
    metrics: RuntimeMetrics,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            retry: RetryPolicy::default(),
            timeouts: TimeoutConfig::default(),
            metrics: RuntimeMetrics::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_metrics(mut self, metrics: RuntimeMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    /// Spec of a registered tool.
    pub fn spec(&self, tool: &str) -> Option<ToolSpec> {
        self.registry.get(tool).map(|t| t.spec().clone())
    }

    /// Executes a tool call.
    ///
    /// Invalid parameters and unknown tools fail without an attempt.
    /// Retryable failures are retried up to the policy's attempt limit;
    /// terminal failures return immediately.
    ///
    /// # Arguments
    ///
    /// * `tool` - Registered tool name
    /// * `params` - Parameter object
    /// * `token` - Cancellation observed during the call and between retries
    pub async fn execute(
        &self,
        tool: &str,
        params: &Value,
        token: &CancellationToken,
    ) -> Result<ToolOutcome, ToolFailure> {
        let handle = self
            .registry
            .get(tool)
            .ok_or_else(|| ToolFailure::immediate(ToolError::NotRegistered(tool.to_string())))?;
        let spec = handle.spec();
        spec.schema.validate(params).map_err(ToolFailure::immediate)?;

        let limit = self.timeouts.for_tool(spec.timeout);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Err(ToolFailure {
                    error: ToolError::Cancelled,
                    attempts: attempt,
                });
            }
            attempt += 1;

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ToolError::Cancelled),
                call = tokio::time::timeout(limit, handle.call(params.clone(), token)) => {
                    call.unwrap_or(Err(ToolError::Timeout(limit)))
                }
            };
            self.metrics.record_tool_call(started.elapsed());

            let error = match result {
                Ok(payload) => {
                    return Ok(ToolOutcome {
                        payload,
                        attempts: attempt,
                    })
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                tracing::debug!(tool, attempt, error = %error, "tool call failed");
                return Err(ToolFailure {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(tool, attempt, ?delay, error = %error, "retrying tool call");
            self.metrics.record(MetricKind::Retry);

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ToolFailure {
                        error: ToolError::Cancelled,
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::cancellation::CancellationTokenSource;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    fn flaky(name: &str, failures: u32, error: ToolError, calls: Arc<AtomicU32>) -> FnTool {
        FnTool::new(ToolSpec::new(name, VolatilityClass::Dynamic), move |params| {
            let calls = calls.clone();
            let error = error.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(error)
                } else {
                    Ok(json!({ "echo": params }))
                }
            }
        })
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ToolError::RateLimited("slow down".into()).is_retryable());
        assert!(ToolError::Upstream { status: 503, message: String::new() }.is_retryable());
        assert!(!ToolError::Upstream { status: 404, message: String::new() }.is_retryable());
        assert!(!ToolError::Unauthorized("key".into()).is_retryable());
        assert!(!ToolError::InvalidParams("x".into()).is_retryable());
    }

    #[test]
    fn test_schema_validation() {
        let schema = ParamSchema::new()
            .required("query", ParamKind::String)
            .optional("limit", ParamKind::Integer);

        assert!(schema.validate(&json!({"query": "rust"})).is_ok());
        assert!(schema.validate(&json!({"query": "rust", "limit": 3, "extra": true})).is_ok());
        assert!(schema.validate(&json!({"limit": 3})).is_err());
        assert!(schema.validate(&json!({"query": 5})).is_err());
        assert!(schema.validate(&json!({"query": "rust", "limit": 2.5})).is_err());
        assert!(schema.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(10), Duration::from_millis(300));

        let jittered = RetryPolicy { jitter: true, ..policy };
        let delay = jittered.delay_for(2);
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = ToolRegistry::builder()
            .register(flaky("search", 0, ToolError::Cancelled, calls.clone()))
            .unwrap()
            .register(flaky("search", 0, ToolError::Cancelled, calls));
        assert!(matches!(result, Err(ToolError::AlreadyRegistered(n)) if n == "search"));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::builder()
            .register(flaky("serp", 2, ToolError::RateLimited("429".into()), calls.clone()))
            .unwrap()
            .build();
        let metrics = RuntimeMetrics::new();
        let executor = ToolExecutor::new(registry)
            .with_retry(fast_retry(3))
            .with_metrics(metrics.clone());

        let outcome = executor
            .execute("serp", &json!({"q": "rust"}), &CancellationToken::none())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.payload, json!({"echo": {"q": "rust"}}));
        assert_eq!(metrics.count(MetricKind::Retry), 2);
        assert_eq!(metrics.count(MetricKind::ToolCall), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let error = ToolError::Upstream { status: 502, message: "bad gateway".into() };
        let registry = ToolRegistry::builder()
            .register(flaky("serp", 10, error.clone(), calls.clone()))
            .unwrap()
            .build();
        let executor = ToolExecutor::new(registry).with_retry(fast_retry(3));

        let failure = executor
            .execute("serp", &json!({}), &CancellationToken::none())
            .await
            .unwrap_err();
        assert_eq!(failure.error, error);
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::builder()
            .register(flaky("serp", 10, ToolError::Unauthorized("bad key".into()), calls.clone()))
            .unwrap()
            .build();
        let executor = ToolExecutor::new(registry).with_retry(fast_retry(5));

        let failure = executor
            .execute("serp", &json!({}), &CancellationToken::none())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_params_skip_the_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let tool = flaky("serp", 0, ToolError::Cancelled, calls.clone());
        let tool = FnTool {
            spec: tool.spec.clone().schema(ParamSchema::new().required("q", ParamKind::String)),
            ..tool
        };
        let executor = ToolExecutor::new(ToolRegistry::builder().register(tool).unwrap().build());

        let failure = executor
            .execute("serp", &json!({}), &CancellationToken::none())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ToolError::InvalidParams(_)));
        assert_eq!(failure.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = ToolExecutor::new(ToolRegistry::builder().build());
        let failure = executor
            .execute("ghost", &json!({}), &CancellationToken::none())
            .await
            .unwrap_err();
        assert_eq!(failure.error, ToolError::NotRegistered("ghost".into()));
    }

    #[tokio::test]
    async fn test_timeout_applies_per_call() {
        let slow = FnTool::new(
            ToolSpec::new("slow", VolatilityClass::Volatile).timeout(Duration::from_millis(20)),
            |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!(null))
            },
        );
        let executor = ToolExecutor::new(ToolRegistry::builder().register(slow).unwrap().build())
            .with_retry(RetryPolicy::no_retry());

        let failure = executor
            .execute("slow", &json!({}), &CancellationToken::none())
            .await
            .unwrap_err();
        assert_eq!(failure.error, ToolError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let slow = FnTool::new(ToolSpec::new("slow", VolatilityClass::Volatile), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        });
        let executor = ToolExecutor::new(ToolRegistry::builder().register(slow).unwrap().build());
        let source = CancellationTokenSource::new();
        let token = source.token();

        let canceller = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let failure = tokio::time::timeout(
            Duration::from_secs(1),
            executor.execute("slow", &json!({}), &token),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(failure.error, ToolError::Cancelled);
    }
}
