//! Logging initialization.
//!
//! Thin wrappers over the observability crate. The long-running server writes
//! structured JSONL to `~/.mailroom/logs/dev.jsonl` and mirrors it to stderr;
//! one-shot CLI commands log to stderr only so stdout stays clean for JSON
//! output.

use crate::Paths;
use observability::LogConfig;

const SERVICE_NAME: &str = "mailroom";

/// Initialize stderr logging at `level` (overridable with `RUST_LOG`).
pub fn init_logging(level: &str) {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: normalized(level),
        ..Default::default()
    });
}

/// Initialize logging to the central JSONL file as well as stderr.
pub fn init_logging_to_file(level: &str, paths: &Paths) {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: normalized(level),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    });
}

fn normalized(level: &str) -> String {
    parse_level(level).to_string().to_ascii_lowercase()
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
