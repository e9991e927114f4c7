//! Storage abstraction layer.
//!
//! Session memory, the roadmap tracker and the tool cache each talk to the
//! store through their own trait. Three backends implement all of them:
//!
//! - [`MemoryStore`]: process-local maps, the default for tests and
//!   single-process deployments
//! - [`NullStore`]: an explicit "no data" backend; reads come back empty and
//!   writes are accepted and dropped
//! - [`SqliteStore`]: durable SQLite storage (feature `sqlite`)
//!
//! Writes are upserts, last writer wins per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::types::{AgentMemory, CompletedTask, RoadmapProgress, StoredMessage};

mod memory;
mod null;
#[cfg(feature = "sqlite")]
mod sqlite;

/// Cache entries a store holds unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

pub use memory::MemoryStore;
pub use null::NullStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Conversation window, completed-task registry and long-term memory.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends a message to a conversation.
    async fn append_message(&self, conversation_id: &str, message: StoredMessage) -> Result<()>;

    /// Returns up to `limit` messages, newest first.
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Drops all but the `keep` newest messages of a conversation.
    async fn trim_messages(&self, conversation_id: &str, keep: usize) -> Result<()>;

    async fn find_completed_task(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> Result<Option<CompletedTask>>;

    /// Inserts a completion record unless the `(user, conversation,
    /// task_key)` triple already exists.
    ///
    /// The check and the insert are one atomic operation: of any number of
    /// concurrent inserts of the same triple, at most one returns `true`.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - The record was inserted
    /// - `Ok(false)` - The triple was already recorded (or the store keeps nothing)
    async fn insert_completed_task(&self, task: CompletedTask) -> Result<bool>;

    /// Completed tasks for a user, optionally narrowed to one conversation.
    async fn completed_tasks(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<CompletedTask>>;

    async fn upsert_memory(&self, memory: AgentMemory) -> Result<()>;

    async fn get_memory(&self, user_id: &str, key: &str) -> Result<Option<AgentMemory>>;

    async fn memories_by_category(&self, user_id: &str, category: &str) -> Result<Vec<AgentMemory>>;
}

/// Per-user roadmap progress.
#[async_trait]
pub trait RoadmapStore: Send + Sync {
    async fn load_progress(&self, user_id: &str) -> Result<Option<RoadmapProgress>>;

    async fn save_progress(&self, progress: &RoadmapProgress) -> Result<()>;
}

/// Backing store for [`ToolCache`](crate::cache::ToolCache).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn put_entry(&self, entry: CacheEntry) -> Result<()>;

    async fn remove_entry(&self, key: &CacheKey) -> Result<()>;

    /// Removes entries expired at `now`, returning how many were dropped.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}
