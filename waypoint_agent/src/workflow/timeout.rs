//! Timeout configuration for tool calls and workflow runs.
//!
//! The per-call timeout is authoritative: every tool call is bounded by
//! its own limit (a tool-declared timeout, or the default here). The run
//! timeout is an optional outer bound; when it fires, the run is cancelled
//! through its token like any other cancellation.

use std::time::Duration;

use waypoint_runtime::TimeoutSection;

/// Default per-call limit.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout limits applied by the executor and engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Limit for tools that do not declare their own
    pub tool_timeout: Duration,
    /// Optional limit for a whole run
    pub run_timeout: Option<Duration>,
}

impl TimeoutConfig {
    /// Default tool timeout, no run timeout.
    pub fn new() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            run_timeout: None,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Effective limit for one call.
    pub fn for_tool(&self, declared: Option<Duration>) -> Duration {
        declared.unwrap_or(self.tool_timeout)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&TimeoutSection> for TimeoutConfig {
    fn from(section: &TimeoutSection) -> Self {
        Self {
            tool_timeout: section.tool_timeout(),
            run_timeout: section.run_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_run_timeout() {
        let config = TimeoutConfig::default();
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert!(config.run_timeout.is_none());
    }

    #[test]
    fn test_declared_timeout_wins() {
        let config = TimeoutConfig::new().with_tool_timeout(Duration::from_secs(5));
        assert_eq!(config.for_tool(None), Duration::from_secs(5));
        assert_eq!(config.for_tool(Some(Duration::from_millis(10))), Duration::from_millis(10));
    }

    #[test]
    fn test_from_config_section() {
        let section = TimeoutSection {
            tool_timeout_secs: 12,
            run_timeout_secs: Some(90),
        };
        let config = TimeoutConfig::from(&section);
        assert_eq!(config.tool_timeout, Duration::from_secs(12));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(90)));
    }
}
