//! Waypoint runtime layer - configuration, telemetry and metrics.
//!
//! This crate provides the ambient services the agent layer is built on:
//!
//! - [`RuntimeConfig`]: YAML-loadable settings for caching, retries,
//!   timeouts, engine concurrency and session memory
//! - [`telemetry`]: `tracing-subscriber` initialisation
//! - [`metrics`]: atomic counters for tool calls and step outcomes
//!
//! Components never read configuration from globals. Callers load a
//! `RuntimeConfig` once and hand the typed sections to whatever needs them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use waypoint_core::cache::TtlPolicy;

pub mod metrics;
pub mod telemetry;

pub use metrics::{MetricKind, MetricsSummary, RuntimeMetrics};

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML did not match the expected shape.
    #[error("invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime configuration.
///
/// Every section falls back to its defaults when omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheSection,
    pub retry: RetrySection,
    pub timeouts: TimeoutSection,
    pub engine: EngineSection,
    pub session: SessionSection,
    pub log_level: LogLevel,
}

/// Tool-result cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// TTL for reference data
    pub reference_ttl_secs: u64,
    /// TTL for dynamic data
    pub dynamic_ttl_secs: u64,
    /// Capacity of the in-memory cache backend
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            reference_ttl_secs: 6 * 60 * 60,
            dynamic_ttl_secs: 30 * 60,
            max_entries: 10_000,
        }
    }
}

impl CacheSection {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            Duration::from_secs(self.reference_ttl_secs),
            Duration::from_secs(self.dynamic_ttl_secs),
        )
    }
}

/// Retry settings for retryable tool failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per call, counting the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Timeout settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    /// Default per-call timeout for tools that declare none
    pub tool_timeout_secs: u64,
    /// Optional bound on a whole workflow run
    pub run_timeout_secs: Option<u64>,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            run_timeout_secs: None,
        }
    }
}

impl TimeoutSection {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Workflow engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Maximum number of steps dispatched at once
    pub max_concurrency: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

/// Session memory settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Messages kept per conversation
    pub window_size: usize,
    /// Messages returned by a recent-messages read
    pub recent_limit: usize,
    /// Topics extracted per conversation
    pub max_topics: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            window_size: 50,
            recent_limit: 20,
            max_topics: 5,
        }
    }
}

/// Log level directive, e.g. `info` or `waypoint_agent=debug`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RuntimeConfig {
    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml_str(&content)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_factor",
                reason: format!("must be >= 1.0, got {}", self.retry.backoff_factor),
            });
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: "must not be below retry.initial_delay_ms".to_string(),
            });
        }
        if self.engine.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.window_size == 0 {
            return Err(ConfigError::Invalid {
                field: "session.window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.timeouts.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts.tool_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
