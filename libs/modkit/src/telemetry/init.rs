//! Structured logging initialization.
//!
//! Builds a `tracing-subscriber` pipeline from [`LoggingConfig`]: an
//! `EnvFilter` derived from the configured level, a formatting layer chosen
//! by [`LogFormat`], and, if `file_dir` is set, a daily-rolling file
//! appender running alongside the console layer.

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::{LogFormat, LoggingConfig};

/// Guard that must be held for the lifetime of the process when file
/// logging is enabled; dropping it stops the background flush thread.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global `tracing` subscriber from `cfg`.
///
/// # Errors
/// Returns an error if the configured `level` is not a valid `EnvFilter`
/// directive, or if a global subscriber was already installed.
pub fn init_tracing(cfg: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .map_err(|source| anyhow::anyhow!("invalid logging level '{}': {source}", cfg.level))?;

    let (file_layer, file_guard) = match &cfg.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "loomwork.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = match cfg.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Json => fmt::layer().json().flatten_event(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|source| anyhow::anyhow!("failed to install global tracing subscriber: {source}"))?;

    Ok(LoggingGuard { _file_guard: file_guard })
}
