//! Process-local storage backend.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CacheStore, RoadmapStore, SessionStore, DEFAULT_CACHE_CAPACITY};
use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::types::{AgentMemory, CompletedTask, RoadmapProgress, StoredMessage};

/// In-memory store implementing every storage trait.
///
/// The cache half is bounded: when full, the least recently used entry is
/// evicted.
#[derive(Debug)]
pub struct MemoryStore {
    messages: RwLock<HashMap<String, VecDeque<StoredMessage>>>,
    completed: RwLock<Vec<CompletedTask>>,
    memories: RwLock<HashMap<(String, String), AgentMemory>>,
    roadmaps: RwLock<HashMap<String, RoadmapProgress>>,
    cache: RwLock<CacheInner>,
}

/// Cache entries plus recency order.
///
/// Each entry carries the tick of its last use; `recency` maps ticks back to
/// keys, so its first element is the least recently used entry.
#[derive(Debug)]
struct CacheInner {
    capacity: usize,
    entries: HashMap<CacheKey, (CacheEntry, u64)>,
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns the entry and marks it most recently used.
    fn touch(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let tick = self.next_tick();
        let (entry, used) = self.entries.get_mut(key)?;
        self.recency.remove(&*used);
        *used = tick;
        self.recency.insert(tick, key.clone());
        Some(entry.clone())
    }

    fn insert(&mut self, entry: CacheEntry) {
        let tick = self.next_tick();
        let key = entry.key.clone();
        if let Some((_, used)) = self.entries.insert(key.clone(), (entry, tick)) {
            self.recency.remove(&used);
        }
        self.recency.insert(tick, key);
    }

    fn forget(&mut self, key: &CacheKey) {
        if let Some((_, used)) = self.entries.remove(key) {
            self.recency.remove(&used);
        }
    }

    fn evict_least_recent(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a store whose cache holds at most `capacity` entries.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            completed: RwLock::new(Vec::new()),
            memories: RwLock::new(HashMap::new()),
            roadmaps: RwLock::new(HashMap::new()),
            cache: RwLock::new(CacheInner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    /// Number of live cache entries.
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn append_message(&self, conversation_id: &str, message: StoredMessage) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages
            .entry(conversation_id.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(conversation_id)
            .map(|window| window.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn trim_messages(&self, conversation_id: &str, keep: usize) -> Result<()> {
        let mut messages = self.messages.write().await;
        if let Some(window) = messages.get_mut(conversation_id) {
            while window.len() > keep {
                window.pop_front();
            }
        }
        Ok(())
    }

    async fn find_completed_task(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> Result<Option<CompletedTask>> {
        let completed = self.completed.read().await;
        Ok(completed
            .iter()
            .find(|t| {
                t.user_id == user_id && t.conversation_id == conversation_id && t.task_key == task_key
            })
            .cloned())
    }

    async fn insert_completed_task(&self, task: CompletedTask) -> Result<bool> {
        let mut completed = self.completed.write().await;
        let exists = completed.iter().any(|t| {
            t.user_id == task.user_id
                && t.conversation_id == task.conversation_id
                && t.task_key == task.task_key
        });
        if exists {
            return Ok(false);
        }
        completed.push(task);
        Ok(true)
    }

    async fn completed_tasks(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<CompletedTask>> {
        let completed = self.completed.read().await;
        Ok(completed
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| conversation_id.map_or(true, |c| t.conversation_id == c))
            .cloned()
            .collect())
    }

    async fn upsert_memory(&self, memory: AgentMemory) -> Result<()> {
        let mut memories = self.memories.write().await;
        memories.insert((memory.user_id.clone(), memory.key.clone()), memory);
        Ok(())
    }

    async fn get_memory(&self, user_id: &str, key: &str) -> Result<Option<AgentMemory>> {
        let memories = self.memories.read().await;
        Ok(memories.get(&(user_id.to_string(), key.to_string())).cloned())
    }

    async fn memories_by_category(&self, user_id: &str, category: &str) -> Result<Vec<AgentMemory>> {
        let memories = self.memories.read().await;
        let mut found: Vec<AgentMemory> = memories
            .values()
            .filter(|m| m.user_id == user_id && m.category == category)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }
}

#[async_trait]
impl RoadmapStore for MemoryStore {
    async fn load_progress(&self, user_id: &str) -> Result<Option<RoadmapProgress>> {
        Ok(self.roadmaps.read().await.get(user_id).cloned())
    }

    async fn save_progress(&self, progress: &RoadmapProgress) -> Result<()> {
        self.roadmaps
            .write()
            .await
            .insert(progress.user_id.clone(), progress.clone());
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.cache.write().await.touch(key))
    }

    async fn put_entry(&self, entry: CacheEntry) -> Result<()> {
        let mut inner = self.cache.write().await;

        if !inner.entries.contains_key(&entry.key) {
            while inner.entries.len() >= inner.capacity {
                if !inner.evict_least_recent() {
                    break;
                }
            }
        }

        inner.insert(entry);
        Ok(())
    }

    async fn remove_entry(&self, key: &CacheKey) -> Result<()> {
        self.cache.write().await.forget(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.cache.write().await;
        let expired: Vec<CacheKey> = inner
            .entries
            .values()
            .filter(|(e, _)| e.is_expired(now))
            .map(|(e, _)| e.key.clone())
            .collect();
        for key in &expired {
            inner.forget(key);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VolatilityClass;
    use crate::types::{Pillar, Role};
    use serde_json::json;

    fn entry(key: &str, expires_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_hex(key),
            tool: "search".to_string(),
            payload: json!(key),
            volatility: VolatilityClass::Reference,
            expires_at,
        }
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let store = MemoryStore::new();
        for text in ["one", "two", "three"] {
            store
                .append_message("c1", StoredMessage::new(Role::User, text))
                .await
                .unwrap();
        }

        let recent = store.recent_messages("c1", 2).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_trim_keeps_newest() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_message("c1", StoredMessage::new(Role::User, format!("m{}", i)))
                .await
                .unwrap();
        }
        store.trim_messages("c1", 2).await.unwrap();

        let recent = store.recent_messages("c1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m4");
        assert_eq!(recent[1].content, "m3");
    }

    #[tokio::test]
    async fn test_completed_task_unique() {
        let store = MemoryStore::new();
        let task = CompletedTask {
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            task_key: "keyword_research".to_string(),
            category: "deep_dive".to_string(),
            pillar: Pillar::Discovery,
            completed_at: Utc::now(),
        };
        assert!(store.insert_completed_task(task.clone()).await.unwrap());
        assert!(!store.insert_completed_task(task).await.unwrap());

        assert_eq!(store.completed_tasks("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_lru_eviction() {
        let store = MemoryStore::with_cache_capacity(2);
        store.put_entry(entry("a", later())).await.unwrap();
        store.put_entry(entry("b", later())).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        store.get_entry(&CacheKey::from_hex("a")).await.unwrap();
        store.put_entry(entry("c", later())).await.unwrap();

        assert_eq!(store.cache_len().await, 2);
        assert!(store.get_entry(&CacheKey::from_hex("b")).await.unwrap().is_none());
        assert!(store.get_entry(&CacheKey::from_hex("a")).await.unwrap().is_some());
        assert!(store.get_entry(&CacheKey::from_hex("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_overwrite_refreshes_recency() {
        let store = MemoryStore::with_cache_capacity(3);
        for key in ["a", "b", "c"] {
            store.put_entry(entry(key, later())).await.unwrap();
        }

        // Overwriting "a" keeps the size and makes "b" the eviction candidate
        store.put_entry(entry("a", later())).await.unwrap();
        assert_eq!(store.cache_len().await, 3);

        store.put_entry(entry("d", later())).await.unwrap();
        assert!(store.get_entry(&CacheKey::from_hex("b")).await.unwrap().is_none());
        for kept in ["a", "c", "d"] {
            assert!(store.get_entry(&CacheKey::from_hex(kept)).await.unwrap().is_some(), "{}", kept);
        }

        store.remove_entry(&CacheKey::from_hex("c")).await.unwrap();
        assert_eq!(store.cache_len().await, 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::seconds(1);
        store.put_entry(entry("old", past)).await.unwrap();
        store.put_entry(entry("fresh", later())).await.unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.cache_len().await, 1);
    }
}
