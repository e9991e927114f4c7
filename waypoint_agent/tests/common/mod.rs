//! Shared fixtures for agent integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use waypoint_agent::workflow::{
    FnTool, RetryPolicy, ToolError, ToolExecutor, ToolRegistry, ToolSpec, WorkflowEngine,
};
use waypoint_core::{
    AgentMemory, CompletedTask, MemoryStore, SessionStore, StoredMessage, ToolCache, TtlPolicy,
    VolatilityClass,
};
use waypoint_runtime::RuntimeMetrics;

/// Counts invocations of a test tool.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Echoes its parameters under `echo`.
pub fn echo_tool(name: &str, volatility: VolatilityClass, calls: CallCounter) -> FnTool {
    FnTool::new(ToolSpec::new(name, volatility), move |params| {
        let calls = calls.clone();
        async move {
            calls.bump();
            Ok(json!({ "echo": params, "url": "https://example.com/a" }))
        }
    })
}

/// Always fails with a terminal error.
pub fn failing_tool(name: &str, calls: CallCounter) -> FnTool {
    FnTool::new(ToolSpec::new(name, VolatilityClass::Volatile), move |_| {
        let calls = calls.clone();
        async move {
            calls.bump();
            Err(ToolError::Unauthorized("bad credentials".to_string()))
        }
    })
}

/// Fails with a retryable error for the first `failures` calls.
pub fn flaky_tool(name: &str, failures: usize, calls: CallCounter) -> FnTool {
    FnTool::new(ToolSpec::new(name, VolatilityClass::Volatile), move |_| {
        let calls = calls.clone();
        async move {
            if calls.bump() <= failures {
                Err(ToolError::RateLimited("slow down".to_string()))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
    })
}

/// Sleeps before answering.
pub fn slow_tool(name: &str, delay: Duration) -> FnTool {
    FnTool::new(ToolSpec::new(name, VolatilityClass::Volatile), move |_| async move {
        tokio::time::sleep(delay).await;
        Ok(json!({ "slow": true }))
    })
}

/// Retry policy with short, deterministic delays.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
        jitter: false,
    }
}

/// Engine over an in-memory cache with one-minute TTLs.
pub fn engine(registry: ToolRegistry, retry: RetryPolicy) -> WorkflowEngine {
    let cache = ToolCache::new(
        Arc::new(MemoryStore::new()),
        TtlPolicy::new(Duration::from_secs(60), Duration::from_secs(60)),
    );
    WorkflowEngine::new(
        ToolExecutor::new(registry).with_retry(retry),
        cache,
        RuntimeMetrics::new(),
    )
}

/// Session store that yields to the scheduler around every call, so
/// concurrent callers interleave the way they would over real I/O.
pub struct YieldingSessionStore {
    inner: Arc<MemoryStore>,
}

impl YieldingSessionStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionStore for YieldingSessionStore {
    async fn append_message(&self, conversation_id: &str, message: StoredMessage) -> waypoint_core::Result<()> {
        tokio::task::yield_now().await;
        self.inner.append_message(conversation_id, message).await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> waypoint_core::Result<Vec<StoredMessage>> {
        tokio::task::yield_now().await;
        self.inner.recent_messages(conversation_id, limit).await
    }

    async fn trim_messages(&self, conversation_id: &str, keep: usize) -> waypoint_core::Result<()> {
        tokio::task::yield_now().await;
        self.inner.trim_messages(conversation_id, keep).await
    }

    async fn find_completed_task(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> waypoint_core::Result<Option<CompletedTask>> {
        tokio::task::yield_now().await;
        let found = self
            .inner
            .find_completed_task(user_id, conversation_id, task_key)
            .await;
        tokio::task::yield_now().await;
        found
    }

    async fn insert_completed_task(&self, task: CompletedTask) -> waypoint_core::Result<bool> {
        tokio::task::yield_now().await;
        let inserted = self.inner.insert_completed_task(task).await;
        tokio::task::yield_now().await;
        inserted
    }

    async fn completed_tasks(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> waypoint_core::Result<Vec<CompletedTask>> {
        tokio::task::yield_now().await;
        self.inner.completed_tasks(user_id, conversation_id).await
    }

    async fn upsert_memory(&self, memory: AgentMemory) -> waypoint_core::Result<()> {
        tokio::task::yield_now().await;
        self.inner.upsert_memory(memory).await
    }

    async fn get_memory(&self, user_id: &str, key: &str) -> waypoint_core::Result<Option<AgentMemory>> {
        tokio::task::yield_now().await;
        self.inner.get_memory(user_id, key).await
    }

    async fn memories_by_category(
        &self,
        user_id: &str,
        category: &str,
    ) -> waypoint_core::Result<Vec<AgentMemory>> {
        tokio::task::yield_now().await;
        self.inner.memories_by_category(user_id, category).await
    }
}
