//! Session memory.
//!
//! Wraps a [`SessionStore`] with the conversation window, the completed-task
//! registry used for suggestion dedup, and per-user long-term memory.
//!
//! Reads that only inform suggestions (recent messages, completed keys,
//! memory lookups) degrade to empty results and log a warning. Writes that
//! protect dedup and progress state return their error.

pub mod topics;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use waypoint_core::{
    AgentMemory, CompletedTask, ConversationMessage, Pillar, Result, Role, SessionStore,
    StoredMessage,
};
use waypoint_runtime::SessionSection;

pub use topics::{detect_current_intent, detect_intent, extract_topics, Intent};

/// Window and extraction limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Messages kept per conversation
    pub window_size: usize,
    /// Messages returned by [`SessionMemory::get_recent_messages`]
    pub recent_limit: usize,
    pub max_topics: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSection::default())
    }
}

impl From<&SessionSection> for SessionConfig {
    fn from(section: &SessionSection) -> Self {
        Self {
            window_size: section.window_size.max(1),
            recent_limit: section.recent_limit,
            max_topics: section.max_topics,
        }
    }
}

/// Per-user conversation and task memory.
#[derive(Clone)]
pub struct SessionMemory {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionMemory {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Appends a message, then evicts the oldest beyond the window.
    pub async fn record_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<()> {
        self.store
            .append_message(conversation_id, StoredMessage::new(role, content))
            .await?;
        self.store
            .trim_messages(conversation_id, self.config.window_size)
            .await
    }

    /// Most recent valid messages, oldest first.
    pub async fn get_recent_messages(&self, conversation_id: &str) -> Vec<ConversationMessage> {
        self.recent_messages(conversation_id, self.config.recent_limit)
            .await
    }

    /// Up to `limit` most recent valid messages, oldest first.
    ///
    /// Entries with an unknown role or empty content are dropped and do not
    /// count towards `limit`; older valid messages in the window fill their
    /// place. A failed read yields an empty window.
    pub async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Vec<ConversationMessage> {
        if limit == 0 {
            return Vec::new();
        }

        // The store never holds more than the window, so one read covers it
        let fetch = self.config.window_size.max(limit);
        let stored = match self.store.recent_messages(conversation_id, fetch).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to read recent messages");
                return Vec::new();
            }
        };

        let mut messages: Vec<ConversationMessage> = stored
            .into_iter()
            .filter_map(|raw| match ConversationMessage::try_from(raw) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(conversation_id, error = %e, "dropping invalid message");
                    None
                }
            })
            .take(limit)
            .collect();
        messages.reverse();
        messages
    }

    /// Records a completed task.
    ///
    /// Idempotent per `(user, conversation, task_key)`. When several callers
    /// complete the same task concurrently, exactly one sees `true`.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - The task was newly recorded
    /// - `Ok(false)` - It was already recorded
    pub async fn mark_task_completed(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
        category: &str,
        pillar: Pillar,
    ) -> Result<bool> {
        let inserted = self
            .store
            .insert_completed_task(CompletedTask {
                user_id: user_id.to_string(),
                conversation_id: conversation_id.to_string(),
                task_key: task_key.to_string(),
                category: category.to_string(),
                pillar,
                completed_at: Utc::now(),
            })
            .await?;
        if !inserted {
            tracing::debug!(user_id, task_key, "task already completed");
        }
        Ok(inserted)
    }

    pub async fn is_task_completed(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> Result<bool> {
        Ok(self
            .store
            .find_completed_task(user_id, conversation_id, task_key)
            .await?
            .is_some())
    }

    /// Task keys a user completed, optionally within one conversation.
    pub async fn completed_task_keys(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> HashSet<String> {
        match self.store.completed_tasks(user_id, conversation_id).await {
            Ok(tasks) => tasks.into_iter().map(|t| t.task_key).collect(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to read completed tasks");
                HashSet::new()
            }
        }
    }

    /// Upserts a long-term memory value.
    ///
    /// A value that cannot be represented as JSON is stored as `{}`.
    pub async fn store_memory<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        key: &str,
        value: &T,
        category: &str,
        conversation_id: Option<&str>,
    ) -> Result<()> {
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            tracing::warn!(user_id, key, error = %e, "memory value not serializable, storing empty record");
            Value::Object(Map::new())
        });

        self.store
            .upsert_memory(AgentMemory {
                user_id: user_id.to_string(),
                key: key.to_string(),
                value,
                category: category.to_string(),
                conversation_id: conversation_id.map(str::to_string),
                updated_at: Utc::now(),
            })
            .await
    }

    pub async fn get_memory(&self, user_id: &str, key: &str) -> Option<Value> {
        match self.store.get_memory(user_id, key).await {
            Ok(memory) => memory.map(|m| m.value),
            Err(e) => {
                tracing::warn!(user_id, key, error = %e, "failed to read memory");
                None
            }
        }
    }

    pub async fn memories_by_category(&self, user_id: &str, category: &str) -> Vec<AgentMemory> {
        self.store
            .memories_by_category(user_id, category)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id, category, error = %e, "failed to read memories");
                Vec::new()
            })
    }

    /// Topics of a message window, capped at the configured count.
    pub fn extract_topics(&self, messages: &[ConversationMessage]) -> Vec<String> {
        extract_topics(messages, self.config.max_topics)
    }
}
