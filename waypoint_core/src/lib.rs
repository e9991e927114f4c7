//! Waypoint core - shared types, storage and tool-result caching
//!
//! This crate holds everything the agent layer persists or shares between
//! components.
//!
//! # Overview
//!
//! - **Types**: pillars, conversation messages, completed tasks, memories
//!   and roadmap progress
//! - **Storage**: session, roadmap and cache traits with in-memory, null and
//!   SQLite backends
//! - **Cache**: content-addressed tool-result cache with TTL bands per
//!   volatility class
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use waypoint_core::cache::{ToolCache, TtlPolicy, VolatilityClass};
//! use waypoint_core::storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = ToolCache::new(Arc::new(MemoryStore::new()), TtlPolicy::default());
//!     let params = json!({"q": "rust"});
//!
//!     cache.put("search", &params, json!({"hits": 3}), VolatilityClass::Reference).await?;
//!     assert!(cache.get("search", &params, VolatilityClass::Reference).await.is_some());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core types used across crates
//! - [`error`]: Error types for storage and cache operations
//! - [`storage`]: Storage abstraction layer
//! - [`cache`]: Tool-result caching

pub mod error;
pub mod types;

pub mod storage;
pub mod cache;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use types::{
    AgentMemory, CompletedTask, ConversationMessage, Payload, Pillar, PillarState,
    RoadmapProgress, Role, StoredMessage,
};
pub use cache::{CacheKey, ToolCache, TtlPolicy, VolatilityClass};
pub use storage::{CacheStore, MemoryStore, NullStore, RoadmapStore, SessionStore};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
