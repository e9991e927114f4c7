//! Tracing subscriber setup.
//!
//! Pretty terminal output in debug builds, JSON with span context in release
//! builds. `RUST_LOG` always wins over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the filter directive for a configured level.
///
/// The level applies globally and to every `waypoint_*` target.
pub fn filter_directive(log_level: &str) -> String {
    let level = log_level.trim();
    let level = if level.is_empty() { "info" } else { level };
    format!(
        "{level},waypoint_core={level},waypoint_runtime={level},waypoint_agent={level}"
    )
}

/// Installs the global subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_telemetry(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            filter_directive("debug"),
            "debug,waypoint_core=debug,waypoint_runtime=debug,waypoint_agent=debug"
        );
        assert!(filter_directive("  ").starts_with("info,"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_telemetry("warn");
        init_telemetry("debug");
    }
}
