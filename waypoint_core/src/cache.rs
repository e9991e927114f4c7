//! Tool-result caching with per-volatility TTL bands.
//!
//! Entries are content-addressed: the key is a SHA-256 digest of the tool
//! name and a canonical encoding of the call parameters, so two calls that
//! differ only in key order or `1` vs `1.0` share an entry.
//!
//! The cache never serves an entry past its expiry. Expired entries found on
//! read are removed and reported as a miss.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::storage::CacheStore;
use crate::types::Payload;

/// How quickly a tool's result goes stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityClass {
    /// Slow-changing reference data (long TTL)
    Reference,
    /// Moderately dynamic results (medium TTL)
    Dynamic,
    /// Fast-changing or per-request data, never cached
    Volatile,
}

impl VolatilityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            VolatilityClass::Reference => "reference",
            VolatilityClass::Dynamic => "dynamic",
            VolatilityClass::Volatile => "volatile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reference" => Some(VolatilityClass::Reference),
            "dynamic" => Some(VolatilityClass::Dynamic),
            "volatile" => Some(VolatilityClass::Volatile),
            _ => None,
        }
    }
}

/// Maps volatility classes to TTL bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    pub reference: Duration,
    pub dynamic: Duration,
}

impl TtlPolicy {
    pub fn new(reference: Duration, dynamic: Duration) -> Self {
        Self { reference, dynamic }
    }

    /// TTL for a class. Volatile is always zero.
    pub fn ttl(&self, class: VolatilityClass) -> Duration {
        match class {
            VolatilityClass::Reference => self.reference,
            VolatilityClass::Dynamic => self.dynamic,
            VolatilityClass::Volatile => Duration::ZERO,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            reference: Duration::from_secs(6 * 60 * 60),
            dynamic: Duration::from_secs(30 * 60),
        }
    }
}

/// Content-addressed cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a tool call.
    pub fn derive(tool: &str, params: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tool.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonicalize(params).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an already-derived key (e.g. read back from a store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored cache entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub tool: String,
    pub payload: Payload,
    pub volatility: VolatilityClass,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Canonical JSON encoding used for key derivation.
///
/// Object keys are sorted recursively and floats with an integral value are
/// written as integers.
pub fn canonicalize(value: &Value) -> String {
    normalize(value).to_string()
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), normalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}

/// Cache-first store for tool results.
#[derive(Clone)]
pub struct ToolCache {
    store: Arc<dyn CacheStore>,
    policy: TtlPolicy,
}

impl ToolCache {
    /// Creates a cache over the given backend.
    pub fn new(store: Arc<dyn CacheStore>, policy: TtlPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    /// Looks up a cached payload.
    ///
    /// Backend failures are logged and reported as a miss.
    pub async fn get(&self, tool: &str, params: &Value, class: VolatilityClass) -> Option<Payload> {
        if self.policy.ttl(class).is_zero() {
            return None;
        }

        let key = CacheKey::derive(tool, params);
        let entry = match self.store.get_entry(&key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(tool, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            if let Err(e) = self.store.remove_entry(&key).await {
                tracing::warn!(tool, error = %e, "failed to evict expired cache entry");
            }
            return None;
        }

        Some(entry.payload)
    }

    /// Writes a payload back after a successful call.
    ///
    /// Returns `Ok(false)` without touching the backend when the class has a
    /// zero TTL.
    pub async fn put(
        &self,
        tool: &str,
        params: &Value,
        payload: Payload,
        class: VolatilityClass,
    ) -> Result<bool> {
        let ttl = self.policy.ttl(class);
        if ttl.is_zero() {
            return Ok(false);
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CoreError::Storage(format!("TTL out of range: {}", e)))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| CoreError::Storage("TTL overflows timestamp".to_string()))?;

        self.store
            .put_entry(CacheEntry {
                key: CacheKey::derive(tool, params),
                tool: tool.to_string(),
                payload,
                volatility: class,
                expires_at,
            })
            .await?;
        Ok(true)
    }

    /// Drops one entry.
    pub async fn invalidate(&self, tool: &str, params: &Value) -> Result<()> {
        self.store.remove_entry(&CacheKey::derive(tool, params)).await
    }

    /// Removes every expired entry from the backend.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(Utc::now()).await
    }
}

impl fmt::Debug for ToolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCache")
            .field("policy", &self.policy)
            .finish()
    }
}
