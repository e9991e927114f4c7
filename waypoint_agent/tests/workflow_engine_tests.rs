//! End-to-end tests for the workflow engine.

mod common;

use std::time::{Duration, Instant};

use common::{echo_tool, engine, failing_tool, fast_retry, flaky_tool, slow_tool, CallCounter};
use serde_json::{json, Value};
use waypoint_agent::workflow::{
    resolve, CancellationTokenSource, ParamValue, RunFailure, RunStatus, SkipReason, StepKey,
    StepStatus, ToolRegistry, WorkflowBuilder, WorkflowDefinition, WorkflowError,
};
use waypoint_core::VolatilityClass;
use waypoint_runtime::MetricKind;

/// Phase 1 runs `a` and `b`; phase 2 runs `c`, bound to `a` and optionally `b`.
fn two_phase(c_uses_b: bool) -> WorkflowDefinition {
    let mut builder = WorkflowBuilder::new("two-phase")
        .phase("collect")
        .step("a", "echo")
        .param("topic", ParamValue::input("topic"))
        .step("b", "fail")
        .phase("combine")
        .step("c", "echo")
        .param("first", ParamValue::output("a", "echo.topic"));
    if c_uses_b {
        builder = builder.param("second", ParamValue::output("b", ""));
    }
    builder.build().unwrap()
}

fn registry(echo_calls: &CallCounter, fail_calls: &CallCounter) -> ToolRegistry {
    ToolRegistry::builder()
        .register(echo_tool("echo", VolatilityClass::Volatile, echo_calls.clone()))
        .unwrap()
        .register(failing_tool("fail", fail_calls.clone()))
        .unwrap()
        .build()
}

#[tokio::test]
async fn test_blocked_consumer_fails_run() {
    let (echo, fail) = (CallCounter::default(), CallCounter::default());
    let engine = engine(registry(&echo, &fail), fast_retry(3));

    let run = engine.run(&two_phase(true), json!({ "topic": "tea" })).await.unwrap();

    assert_eq!(run.step("a").unwrap().status(), StepStatus::Succeeded);
    assert_eq!(run.step("b").unwrap().status(), StepStatus::Failed);
    let c = run.step("c").unwrap();
    assert_eq!(c.status(), StepStatus::Skipped);
    assert_eq!(c.skip_reason(), Some(&SkipReason::UpstreamFailed(StepKey::from("b"))));
    assert_eq!(run.status, RunStatus::Failed);
    match &run.failure {
        Some(RunFailure::Blocked { step, error }) => {
            assert_eq!(step, &StepKey::from("b"));
            assert!(error.contains("bad credentials"));
        }
        other => panic!("unexpected failure {:?}", other),
    }

    // Terminal failures are not retried and skipped steps never run
    assert_eq!(fail.get(), 1);
    assert_eq!(echo.get(), 1);
    assert!(run.outputs().contains_key(&StepKey::from("a")));
}

#[tokio::test]
async fn test_independent_failure_is_partial() {
    let (echo, fail) = (CallCounter::default(), CallCounter::default());
    let engine = engine(registry(&echo, &fail), fast_retry(3));

    let run = engine.run(&two_phase(false), json!({ "topic": "tea" })).await.unwrap();

    assert_eq!(run.step("b").unwrap().status(), StepStatus::Failed);
    let c = run.step("c").unwrap();
    assert_eq!(c.status(), StepStatus::Succeeded);
    assert_eq!(c.output().unwrap()["echo"]["first"], json!("tea"));
    assert_eq!(run.status, RunStatus::PartiallyFailed);
    assert!(run.failure.is_none());
    assert!(run.is_usable());
}

#[tokio::test]
async fn test_cycle_rejected_before_dispatch() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(echo_tool("echo", VolatilityClass::Volatile, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("loop")
        .phase("p")
        .step("first", "echo")
        .step("x", "echo")
        .param("v", ParamValue::output("y", ""))
        .step("y", "echo")
        .param("v", ParamValue::output("x", ""))
        .build()
        .unwrap();

    let err = engine(registry, fast_retry(1))
        .run(&definition, Value::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::CycleDetected(_)));
    assert_eq!(calls.get(), 0);
}

#[tokio::test]
async fn test_missing_input_rejected_before_dispatch() {
    let (echo, fail) = (CallCounter::default(), CallCounter::default());
    let engine = engine(registry(&echo, &fail), fast_retry(1));

    let err = engine.run(&two_phase(false), json!({})).await.unwrap_err();

    assert_eq!(err, WorkflowError::MissingInput("topic".to_string()));
    assert_eq!(echo.get() + fail.get(), 0);
}

#[test]
fn test_batches_respect_dependencies() {
    let definition = WorkflowBuilder::new("diamond")
        .phase("one")
        .step("root", "t")
        .step("left", "t")
        .param("v", ParamValue::output("root", ""))
        .step("right", "t")
        .param("v", ParamValue::output("root", ""))
        .step("join", "t")
        .param("l", ParamValue::output("left", ""))
        .param("r", ParamValue::template("{{right.x}} and {{root.y}}"))
        .step("lonely", "t")
        .sequential_step("after", "t")
        .phase("two")
        .step("final", "t")
        .param("v", ParamValue::output("join", ""))
        .build()
        .unwrap();

    let plan = resolve(&definition).unwrap();

    for phase in &plan.phases {
        let batch_of = |key: &StepKey| phase.batches.iter().position(|b| b.contains(key));
        for (index, batch) in phase.batches.iter().enumerate() {
            for key in batch {
                for dep in plan.dependencies(key) {
                    if let Some(dep_batch) = batch_of(dep) {
                        assert!(dep_batch < index, "{} must follow {}", key, dep);
                    }
                }
            }
        }
    }
    assert_eq!(plan.phases[0].batches[0], vec![StepKey::from("root"), StepKey::from("lonely")]);
    assert_eq!(plan.phases[1].batches, vec![vec![StepKey::from("final")]]);
}

#[tokio::test]
async fn test_retryable_failures_are_retried() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(flaky_tool("flaky", 2, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("retry")
        .phase("p")
        .step("only", "flaky")
        .build()
        .unwrap();
    let engine = engine(registry, fast_retry(3));

    let run = engine.run(&definition, Value::Null).await.unwrap();

    let step = run.step("only").unwrap();
    assert_eq!(step.status(), StepStatus::Succeeded);
    assert_eq!(step.attempts(), 3);
    assert_eq!(calls.get(), 3);
    assert_eq!(engine.metrics().count(MetricKind::Retry), 2);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(flaky_tool("flaky", 10, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("retry")
        .phase("p")
        .step("only", "flaky")
        .build()
        .unwrap();

    let run = engine(registry, fast_retry(2)).run(&definition, Value::Null).await.unwrap();

    let step = run.step("only").unwrap();
    assert_eq!(step.status(), StepStatus::Failed);
    assert_eq!(step.attempts(), 2);
    assert_eq!(calls.get(), 2);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure, Some(RunFailure::NoStepSucceeded));
}

#[tokio::test]
async fn test_second_run_hits_cache() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(echo_tool("lookup", VolatilityClass::Reference, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("cached")
        .phase("p")
        .step("lookup", "lookup")
        .param("q", ParamValue::input("topic"))
        .param("limit", ParamValue::literal(5))
        .build()
        .unwrap();
    let engine = engine(registry, fast_retry(1));

    let first = engine.run(&definition, json!({ "topic": "tea" })).await.unwrap();
    let second = engine.run(&definition, json!({ "topic": "tea" })).await.unwrap();

    assert!(!first.step("lookup").unwrap().from_cache());
    let cached = second.step("lookup").unwrap();
    assert!(cached.from_cache());
    assert_eq!(cached.attempts(), 0);
    assert_eq!(cached.output(), first.step("lookup").unwrap().output());
    assert_eq!(calls.get(), 1);
    assert_eq!(engine.metrics().count(MetricKind::CacheHit), 1);
    assert_eq!(engine.metrics().count(MetricKind::CacheMiss), 1);

    // Different parameters miss
    engine.run(&definition, json!({ "topic": "coffee" })).await.unwrap();
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_volatile_tools_are_never_cached() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(echo_tool("live", VolatilityClass::Volatile, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("live")
        .phase("p")
        .step("live", "live")
        .build()
        .unwrap();
    let engine = engine(registry, fast_retry(1));

    engine.run(&definition, Value::Null).await.unwrap();
    let second = engine.run(&definition, Value::Null).await.unwrap();

    assert!(!second.step("live").unwrap().from_cache());
    assert_eq!(calls.get(), 2);
}

fn slow_workflow() -> (ToolRegistry, WorkflowDefinition) {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(slow_tool("slow", Duration::from_secs(5)))
        .unwrap()
        .register(echo_tool("echo", VolatilityClass::Volatile, calls))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("slow")
        .phase("quick")
        .step("quick", "echo")
        .phase("wait")
        .step("wait", "slow")
        .phase("after")
        .step("after", "echo")
        .build()
        .unwrap();
    (registry, definition)
}

#[tokio::test]
async fn test_cancellation_skips_unfinished_steps() {
    let (registry, definition) = slow_workflow();
    let engine = engine(registry, fast_retry(1));
    let source = CancellationTokenSource::new();

    let canceller = source.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let run = engine
        .run_with_cancellation(&definition, Value::Null, source.token())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(run.step("quick").unwrap().status(), StepStatus::Succeeded);
    assert_eq!(run.step("wait").unwrap().skip_reason(), Some(&SkipReason::Cancelled));
    assert_eq!(run.step("after").unwrap().skip_reason(), Some(&SkipReason::Cancelled));
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure, Some(RunFailure::Cancelled));
}

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(echo_tool("echo", VolatilityClass::Volatile, calls.clone()))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("x")
        .phase("p")
        .step("a", "echo")
        .build()
        .unwrap();
    let source = CancellationTokenSource::new();
    source.cancel();

    let run = engine(registry, fast_retry(1))
        .run_with_cancellation(&definition, Value::Null, source.token())
        .await
        .unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(run.step("a").unwrap().status(), StepStatus::Skipped);
    assert_eq!(run.failure, Some(RunFailure::Cancelled));
}

#[tokio::test]
async fn test_run_timeout() {
    let (registry, definition) = slow_workflow();
    let engine = engine(registry, fast_retry(1)).with_run_timeout(Duration::from_millis(50));

    let run = engine.run(&definition, Value::Null).await.unwrap();

    assert_eq!(run.step("quick").unwrap().status(), StepStatus::Succeeded);
    assert_eq!(run.step("wait").unwrap().skip_reason(), Some(&SkipReason::TimedOut));
    assert_eq!(run.step("after").unwrap().skip_reason(), Some(&SkipReason::TimedOut));
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure, Some(RunFailure::TimedOut { after_ms: 50 }));
}

#[tokio::test]
async fn test_template_params_render_strings() {
    let calls = CallCounter::default();
    let registry = ToolRegistry::builder()
        .register(echo_tool("echo", VolatilityClass::Volatile, calls))
        .unwrap()
        .build();
    let definition = WorkflowBuilder::new("template")
        .phase("one")
        .step("search", "echo")
        .param("q", ParamValue::input("topic"))
        .phase("two")
        .step("summary", "echo")
        .param(
            "prompt",
            ParamValue::template("Summarise {{search.url}} for {{input.audience}}"),
        )
        .build()
        .unwrap();

    let run = engine(registry, fast_retry(1))
        .run(&definition, json!({ "topic": "tea", "audience": "beginners" }))
        .await
        .unwrap();

    assert_eq!(
        run.step("summary").unwrap().output().unwrap()["echo"]["prompt"],
        json!("Summarise https://example.com/a for beginners")
    );
}
