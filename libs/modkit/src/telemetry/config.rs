//! Logging configuration for the engine's structured-logging layer.

use serde::{Deserialize, Serialize};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, ANSI-colored (default for interactive terminals).
    #[default]
    Pretty,
    /// Newline-delimited JSON, suited to log aggregation pipelines.
    Json,
    /// Single-line compact text.
    Compact,
}

/// Logging configuration, driven by the `logging` config section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter` directive, e.g. `"info,modkit=debug"`.
    pub level: String,
    pub format: LogFormat,
    /// Optional directory to also write rolling log files into.
    pub file_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Pretty,
            file_dir: None,
        }
    }
}
