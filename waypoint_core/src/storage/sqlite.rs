//! SQLite storage backend.
//!
//! A single connection guarded by a mutex. Statements are short and never
//! held across an await point.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheStore, RoadmapStore, SessionStore, DEFAULT_CACHE_CAPACITY};
use crate::cache::{CacheEntry, CacheKey, VolatilityClass};
use crate::error::{CoreError, Result};
use crate::types::{AgentMemory, CompletedTask, PillarState, RoadmapProgress, StoredMessage};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS completed_tasks (
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    task_key TEXT NOT NULL,
    category TEXT NOT NULL,
    pillar TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    UNIQUE (user_id, conversation_id, task_key)
);

CREATE TABLE IF NOT EXISTS agent_memory (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value_json TEXT NOT NULL,
    category TEXT NOT NULL,
    conversation_id TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);

CREATE TABLE IF NOT EXISTS roadmap_progress (
    user_id TEXT PRIMARY KEY,
    pillars_json TEXT NOT NULL,
    current_pillar TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_cache (
    key TEXT PRIMARY KEY,
    tool TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    volatility TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id);
CREATE INDEX IF NOT EXISTS idx_completed_user ON completed_tasks(user_id, conversation_id);
CREATE INDEX IF NOT EXISTS idx_memory_category ON agent_memory(user_id, category);
CREATE INDEX IF NOT EXISTS idx_cache_expiry ON tool_cache(expires_at_ms);
";

/// SQLite-backed store implementing every storage trait.
///
/// The `tool_cache` table is bounded. A put that takes it past capacity
/// first purges expired rows, then evicts the rows closest to expiry.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cache_capacity: usize,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        })
    }

    /// Caps the tool cache at `capacity` rows (minimum 1).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Number of rows in the tool cache, expired ones included.
    pub async fn cache_len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tool_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Brings `tool_cache` back within `capacity`, never evicting `keep`.
fn enforce_cache_capacity(conn: &Connection, capacity: usize, keep: &str, now_ms: i64) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tool_cache", [], |row| row.get(0))?;
    let capacity = i64::try_from(capacity).unwrap_or(i64::MAX);
    if count <= capacity {
        return Ok(0);
    }

    let mut removed = conn.execute(
        "DELETE FROM tool_cache WHERE expires_at_ms <= ?1 AND key != ?2",
        params![now_ms, keep],
    )?;
    let excess = count - i64::try_from(removed).unwrap_or(0) - capacity;
    if excess > 0 {
        removed += conn.execute(
            "DELETE FROM tool_cache WHERE key IN (
                SELECT key FROM tool_cache WHERE key != ?1
                ORDER BY expires_at_ms ASC, rowid ASC LIMIT ?2
            )",
            params![keep, excess],
        )?;
    }
    Ok(removed)
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn stamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::CorruptRecord(format!("bad timestamp '{}': {}", raw, e)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CoreError::CorruptRecord(format!("bad expiry {}", ms)))
}

type TaskRow = (String, String, String, String, String, String);

fn task_from_row(row: TaskRow) -> Result<CompletedTask> {
    let (user_id, conversation_id, task_key, category, pillar, completed_at) = row;
    Ok(CompletedTask {
        user_id,
        conversation_id,
        task_key,
        category,
        pillar: pillar.parse()?,
        completed_at: parse_time(&completed_at)?,
    })
}

type MemoryRow = (String, String, String, String, Option<String>, String);

fn memory_from_row(row: MemoryRow) -> Result<AgentMemory> {
    let (user_id, key, value_json, category, conversation_id, updated_at) = row;
    Ok(AgentMemory {
        user_id,
        key,
        value: serde_json::from_str(&value_json)?,
        category,
        conversation_id,
        updated_at: parse_time(&updated_at)?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn append_message(&self, conversation_id: &str, message: StoredMessage) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_id,
                message.role,
                message.content,
                stamp(&message.created_at)
            ],
        )?;
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let rows: Vec<(String, String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT role, content, created_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![conversation_id, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(role, content, created_at)| {
                Ok(StoredMessage {
                    role,
                    content,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    async fn trim_messages(&self, conversation_id: &str, keep: usize) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND id NOT IN (
                SELECT id FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![conversation_id, keep as i64],
        )?;
        Ok(())
    }

    async fn find_completed_task(
        &self,
        user_id: &str,
        conversation_id: &str,
        task_key: &str,
    ) -> Result<Option<CompletedTask>> {
        let row: Option<TaskRow> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT user_id, conversation_id, task_key, category, pillar, completed_at
                 FROM completed_tasks WHERE user_id = ?1 AND conversation_id = ?2 AND task_key = ?3",
                params![user_id, conversation_id, task_key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?
        };
        row.map(task_from_row).transpose()
    }

    async fn insert_completed_task(&self, task: CompletedTask) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO completed_tasks
             (user_id, conversation_id, task_key, category, pillar, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.user_id,
                task.conversation_id,
                task.task_key,
                task.category,
                task.pillar.as_str(),
                stamp(&task.completed_at)
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn completed_tasks(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<CompletedTask>> {
        let rows: Vec<TaskRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT user_id, conversation_id, task_key, category, pillar, completed_at
                 FROM completed_tasks
                 WHERE user_id = ?1 AND (?2 IS NULL OR conversation_id = ?2)
                 ORDER BY completed_at",
            )?;
            let rows = stmt
                .query_map(params![user_id, conversation_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(task_from_row).collect()
    }

    async fn upsert_memory(&self, memory: AgentMemory) -> Result<()> {
        let value_json = serde_json::to_string(&memory.value)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_memory (user_id, key, value_json, category, conversation_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, key) DO UPDATE SET
                value_json = excluded.value_json,
                category = excluded.category,
                conversation_id = excluded.conversation_id,
                updated_at = excluded.updated_at",
            params![
                memory.user_id,
                memory.key,
                value_json,
                memory.category,
                memory.conversation_id,
                stamp(&memory.updated_at)
            ],
        )?;
        Ok(())
    }

    async fn get_memory(&self, user_id: &str, key: &str) -> Result<Option<AgentMemory>> {
        let row: Option<MemoryRow> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT user_id, key, value_json, category, conversation_id, updated_at
                 FROM agent_memory WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?
        };
        row.map(memory_from_row).transpose()
    }

    async fn memories_by_category(&self, user_id: &str, category: &str) -> Result<Vec<AgentMemory>> {
        let rows: Vec<MemoryRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT user_id, key, value_json, category, conversation_id, updated_at
                 FROM agent_memory WHERE user_id = ?1 AND category = ?2
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map(params![user_id, category], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(memory_from_row).collect()
    }
}

#[async_trait]
impl RoadmapStore for SqliteStore {
    async fn load_progress(&self, user_id: &str) -> Result<Option<RoadmapProgress>> {
        let row: Option<(String, String, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT pillars_json, current_pillar, updated_at FROM roadmap_progress WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
        };

        let Some((pillars_json, current_pillar, updated_at)) = row else {
            return Ok(None);
        };
        let pillars: [PillarState; 4] = serde_json::from_str(&pillars_json)?;
        Ok(Some(RoadmapProgress {
            user_id: user_id.to_string(),
            pillars,
            current_pillar: current_pillar.parse()?,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    async fn save_progress(&self, progress: &RoadmapProgress) -> Result<()> {
        let pillars_json = serde_json::to_string(&progress.pillars)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO roadmap_progress (user_id, pillars_json, current_pillar, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                pillars_json = excluded.pillars_json,
                current_pillar = excluded.current_pillar,
                updated_at = excluded.updated_at",
            params![
                progress.user_id,
                pillars_json,
                progress.current_pillar.as_str(),
                stamp(&progress.updated_at)
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row: Option<(String, String, String, i64)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT tool, payload_json, volatility, expires_at_ms FROM tool_cache WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?
        };

        let Some((tool, payload_json, volatility, expires_at_ms)) = row else {
            return Ok(None);
        };
        let volatility = VolatilityClass::parse(&volatility)
            .ok_or_else(|| CoreError::CorruptRecord(format!("unknown volatility '{}'", volatility)))?;
        Ok(Some(CacheEntry {
            key: key.clone(),
            tool,
            payload: serde_json::from_str(&payload_json)?,
            volatility,
            expires_at: from_millis(expires_at_ms)?,
        }))
    }

    async fn put_entry(&self, entry: CacheEntry) -> Result<()> {
        let payload_json = serde_json::to_string(&entry.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tool_cache (key, tool, payload_json, volatility, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                tool = excluded.tool,
                payload_json = excluded.payload_json,
                volatility = excluded.volatility,
                expires_at_ms = excluded.expires_at_ms",
            params![
                entry.key.as_str(),
                entry.tool,
                payload_json,
                entry.volatility.as_str(),
                entry.expires_at.timestamp_millis()
            ],
        )?;

        let evicted = enforce_cache_capacity(
            &conn,
            self.cache_capacity,
            entry.key.as_str(),
            Utc::now().timestamp_millis(),
        )?;
        if evicted > 0 {
            tracing::debug!(evicted, capacity = self.cache_capacity, "tool cache over capacity");
        }
        Ok(())
    }

    async fn remove_entry(&self, key: &CacheKey) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tool_cache WHERE key = ?1", params![key.as_str()])?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM tool_cache WHERE expires_at_ms <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pillar, Role};
    use serde_json::json;

    fn memory(key: &str, category: &str, minutes_ago: i64) -> AgentMemory {
        AgentMemory {
            user_id: "u1".to_string(),
            key: key.to_string(),
            value: json!({ "key": key }),
            category: category.to_string(),
            conversation_id: None,
            updated_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_messages_window() {
        let store = SqliteStore::in_memory().unwrap();
        for i in 0..4 {
            store
                .append_message("c1", StoredMessage::new(Role::User, format!("m{}", i)))
                .await
                .unwrap();
        }
        store.append_message("c2", StoredMessage::new(Role::User, "other")).await.unwrap();

        store.trim_messages("c1", 3).await.unwrap();
        let recent = store.recent_messages("c1", 10).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m2", "m1"]);
        assert_eq!(store.recent_messages("c2", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_task_ignores_duplicates() {
        let store = SqliteStore::in_memory().unwrap();
        let task = CompletedTask {
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            task_key: "competitor_scan".to_string(),
            category: "adjacent".to_string(),
            pillar: Pillar::GapAnalysis,
            completed_at: Utc::now(),
        };
        assert!(store.insert_completed_task(task.clone()).await.unwrap());
        assert!(!store.insert_completed_task(task).await.unwrap());

        let all = store.completed_tasks("u1", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].pillar, Pillar::GapAnalysis);
        assert!(store.completed_tasks("u1", Some("other")).await.unwrap().is_empty());
        assert!(store
            .find_completed_task("u1", "c1", "competitor_scan")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_memory_upsert_and_category_order() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_memory(memory("a", "topic", 10)).await.unwrap();
        store.upsert_memory(memory("b", "topic", 1)).await.unwrap();
        store.upsert_memory(memory("c", "pref", 0)).await.unwrap();

        let mut updated = memory("a", "topic", 0);
        updated.value = json!("new");
        store.upsert_memory(updated).await.unwrap();

        let got = store.get_memory("u1", "a").await.unwrap().unwrap();
        assert_eq!(got.value, json!("new"));

        let topics = store.memories_by_category("u1", "topic").await.unwrap();
        let keys: Vec<&str> = topics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_roadmap_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("waypoint.db");

        let mut progress = RoadmapProgress::new("u1");
        progress.pillar_mut(Pillar::Discovery).progress = 100;
        progress.current_pillar = Pillar::GapAnalysis;
        progress
            .pillar_mut(Pillar::Discovery)
            .metadata
            .insert("source".to_string(), json!("workflow"));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_progress(&progress).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.load_progress("u1").await.unwrap().unwrap();
        assert_eq!(loaded.current_pillar, Pillar::GapAnalysis);
        assert_eq!(loaded.progress(Pillar::Discovery), 100);
        assert_eq!(loaded.pillar(Pillar::Discovery).metadata["source"], json!("workflow"));
    }

    fn cache_entry(key: &str, expires_in_secs: i64) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_hex(key),
            tool: "search".to_string(),
            payload: json!(key),
            volatility: VolatilityClass::Dynamic,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_expired_first() {
        let store = SqliteStore::in_memory().unwrap().with_cache_capacity(2);
        store.put_entry(cache_entry("stale", -5)).await.unwrap();
        store.put_entry(cache_entry("a", 600)).await.unwrap();
        store.put_entry(cache_entry("b", 60)).await.unwrap();

        assert_eq!(store.cache_len().await.unwrap(), 2);
        assert!(store.get_entry(&CacheKey::from_hex("stale")).await.unwrap().is_none());
        assert!(store.get_entry(&CacheKey::from_hex("a")).await.unwrap().is_some());
        assert!(store.get_entry(&CacheKey::from_hex("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_soonest_expiry() {
        let store = SqliteStore::in_memory().unwrap().with_cache_capacity(3);
        store.put_entry(cache_entry("long", 3600)).await.unwrap();
        store.put_entry(cache_entry("short", 60)).await.unwrap();
        store.put_entry(cache_entry("medium", 600)).await.unwrap();
        // Shortest-lived of all, but the row just written is never evicted
        store.put_entry(cache_entry("newest", 30)).await.unwrap();
        store.put_entry(cache_entry("last", 1800)).await.unwrap();

        assert_eq!(store.cache_len().await.unwrap(), 3);
        assert!(store.get_entry(&CacheKey::from_hex("short")).await.unwrap().is_none());
        assert!(store.get_entry(&CacheKey::from_hex("newest")).await.unwrap().is_none());
        for kept in ["long", "medium", "last"] {
            assert!(store.get_entry(&CacheKey::from_hex(kept)).await.unwrap().is_some(), "{}", kept);
        }
    }

    #[tokio::test]
    async fn test_cache_entries() {
        let store = SqliteStore::in_memory().unwrap();
        let live = CacheEntry {
            key: CacheKey::from_hex("live"),
            tool: "search".to_string(),
            payload: json!({"hits": [1, 2]}),
            volatility: VolatilityClass::Reference,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        let stale = CacheEntry {
            key: CacheKey::from_hex("stale"),
            expires_at: Utc::now() - chrono::Duration::seconds(5),
            ..live.clone()
        };
        store.put_entry(live.clone()).await.unwrap();
        store.put_entry(stale).await.unwrap();

        let got = store.get_entry(&live.key).await.unwrap().unwrap();
        assert_eq!(got.payload, live.payload);
        assert_eq!(got.volatility, VolatilityClass::Reference);

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        store.remove_entry(&live.key).await.unwrap();
        assert!(store.get_entry(&live.key).await.unwrap().is_none());
    }
}
