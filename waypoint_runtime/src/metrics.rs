//! Runtime metrics for tool calls, step outcomes and cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of metric being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Tool invocation (one per attempt)
    ToolCall,
    /// Retry after a retryable tool failure
    Retry,
    /// Cache hit
    CacheHit,
    /// Cache miss
    CacheMiss,
    /// Step finished successfully
    StepSucceeded,
    /// Step failed
    StepFailed,
    /// Step skipped
    StepSkipped,
}

const KIND_COUNT: usize = 7;

/// Runtime metrics collector.
///
/// Cheap to clone; clones share the same counters.
#[derive(Clone, Debug)]
pub struct RuntimeMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    counts: [AtomicU64; KIND_COUNT],
    /// Accumulated tool time (nanoseconds)
    tool_time_ns: AtomicU64,
}

impl RuntimeMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counts: Default::default(),
                tool_time_ns: AtomicU64::new(0),
            }),
        }
    }

    /// Records a metric occurrence.
    pub fn record(&self, kind: MetricKind) {
        self.inner.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Records one tool call and the time it took.
    pub fn record_tool_call(&self, duration: Duration) {
        self.record(MetricKind::ToolCall);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.inner.tool_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Records a cache access.
    pub fn record_cache_access(&self, hit: bool) {
        if hit {
            self.record(MetricKind::CacheHit);
        } else {
            self.record(MetricKind::CacheMiss);
        }
    }

    /// Gets the count for a specific metric.
    pub fn count(&self, kind: MetricKind) -> u64 {
        self.inner.counts[kind as usize].load(Ordering::Relaxed)
    }

    /// Total time spent inside tool calls.
    pub fn tool_time(&self) -> Duration {
        Duration::from_nanos(self.inner.tool_time_ns.load(Ordering::Relaxed))
    }

    /// Gets the cache hit rate (0.0 to 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.count(MetricKind::CacheHit);
        let misses = self.count(MetricKind::CacheMiss);
        let total = hits + misses;

        if total == 0 {
            return 0.0;
        }

        hits as f64 / total as f64
    }

    /// Gets all metrics as a summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            tool_calls: self.count(MetricKind::ToolCall),
            retries: self.count(MetricKind::Retry),
            steps_succeeded: self.count(MetricKind::StepSucceeded),
            steps_failed: self.count(MetricKind::StepFailed),
            steps_skipped: self.count(MetricKind::StepSkipped),
            tool_time: self.tool_time(),
            cache_hit_rate: self.cache_hit_rate(),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        for count in &self.inner.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.inner.tool_time_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of runtime metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Tool invocations, retries included
    pub tool_calls: u64,
    pub retries: u64,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    /// Total time spent inside tool calls
    pub tool_time: Duration,
    /// Cache hit rate (0.0 to 1.0)
    pub cache_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record() {
        let metrics = RuntimeMetrics::new();

        metrics.record(MetricKind::StepFailed);
        metrics.record(MetricKind::StepFailed);

        assert_eq!(metrics.count(MetricKind::StepFailed), 2);
        assert_eq!(metrics.count(MetricKind::StepSkipped), 0);
    }

    #[test]
    fn test_tool_time_accumulates() {
        let metrics = RuntimeMetrics::new();

        metrics.record_tool_call(Duration::from_millis(100));
        metrics.record_tool_call(Duration::from_millis(50));

        assert_eq!(metrics.count(MetricKind::ToolCall), 2);
        assert_eq!(metrics.tool_time(), Duration::from_millis(150));
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = RuntimeMetrics::new();
        assert_eq!(metrics.cache_hit_rate(), 0.0);

        metrics.record_cache_access(true);
        metrics.record_cache_access(true);
        metrics.record_cache_access(false);

        // 2 hits out of 3
        assert!((metrics.cache_hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = RuntimeMetrics::new();
        let clone = metrics.clone();

        clone.record(MetricKind::Retry);
        assert_eq!(metrics.count(MetricKind::Retry), 1);

        metrics.reset();
        assert_eq!(clone.count(MetricKind::Retry), 0);
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = RuntimeMetrics::new();

        metrics.record(MetricKind::StepSucceeded);
        metrics.record(MetricKind::StepSkipped);
        metrics.record_cache_access(true);

        let summary = metrics.summary();

        assert_eq!(summary.steps_succeeded, 1);
        assert_eq!(summary.steps_skipped, 1);
        assert_eq!(summary.tool_calls, 0);
        assert_eq!(summary.cache_hit_rate, 1.0);
    }
}
