//! Tracing bootstrap: human-readable stderr plus optional JSON file logging.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Map a verbosity count to a filter directive.
pub fn filter_for(verbosity: u8, quiet: bool) -> &'static str {
    match verbosity {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// The stderr layer honours `RUST_LOG` when set, otherwise `filter_for(verbosity)`.
/// When `log_dir` is given, a daily-rolling `tonet.log` receives JSON records at
/// debug level; keep the returned guard alive to flush it.
pub fn init_tracing(verbosity: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity, false)));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let (json_layer, guard) = match log_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, "tonet.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (e.g. from tests) is not an error worth surfacing.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_levels() {
        assert_eq!(filter_for(0, true), "error");
        assert_eq!(filter_for(0, false), "info");
        assert_eq!(filter_for(1, false), "debug");
        assert_eq!(filter_for(4, false), "trace");
    }

    #[test]
    fn test_init_with_log_dir_returns_guard() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let guard = init_tracing(1, Some(&logs));
        assert!(guard.is_some());
        assert!(logs.is_dir());
        assert!(init_tracing(0, None).is_none());
    }
}
