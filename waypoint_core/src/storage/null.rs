//! Backend that stores nothing.
//!
//! Used when no durable store is configured: every read reports "no data"
//! and every write succeeds without effect. Components built on it behave
//! as a fresh user on every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheStore, RoadmapStore, SessionStore};
use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::types::{AgentMemory, CompletedTask, RoadmapProgress, StoredMessage};

#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionStore for NullStore {
    async fn append_message(&self, _conversation_id: &str, _message: StoredMessage) -> Result<()> {
        Ok(())
    }

    async fn recent_messages(&self, _conversation_id: &str, _limit: usize) -> Result<Vec<StoredMessage>> {
        Ok(Vec::new())
    }

    async fn trim_messages(&self, _conversation_id: &str, _keep: usize) -> Result<()> {
        Ok(())
    }

    async fn find_completed_task(
        &self,
        _user_id: &str,
        _conversation_id: &str,
        _task_key: &str,
    ) -> Result<Option<CompletedTask>> {
        Ok(None)
    }

    async fn insert_completed_task(&self, _task: CompletedTask) -> Result<bool> {
        Ok(false)
    }

    async fn completed_tasks(
        &self,
        _user_id: &str,
        _conversation_id: Option<&str>,
    ) -> Result<Vec<CompletedTask>> {
        Ok(Vec::new())
    }

    async fn upsert_memory(&self, _memory: AgentMemory) -> Result<()> {
        Ok(())
    }

    async fn get_memory(&self, _user_id: &str, _key: &str) -> Result<Option<AgentMemory>> {
        Ok(None)
    }

    async fn memories_by_category(&self, _user_id: &str, _category: &str) -> Result<Vec<AgentMemory>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RoadmapStore for NullStore {
    async fn load_progress(&self, _user_id: &str) -> Result<Option<RoadmapProgress>> {
        Ok(None)
    }

    async fn save_progress(&self, _progress: &RoadmapProgress) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CacheStore for NullStore {
    async fn get_entry(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    async fn put_entry(&self, _entry: CacheEntry) -> Result<()> {
        Ok(())
    }

    async fn remove_entry(&self, _key: &CacheKey) -> Result<()> {
        Ok(())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}
