use std::{fs, path::Path};

use anyhow::{Context, Result};
use core_types::config::LoggingSection;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging for the daemon process.
///
/// - Honors `logging.level` from config, falling back to `RUST_LOG`
///   then `info`.
/// - Writes JSON logs to a daily-rolling file under
///   `<data_dir>/logs` and text or JSON to stdout per config.
pub fn init(
    cfg: &LoggingSection,
    data_dir: &Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter_str = if cfg.level.is_empty() {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())
    } else {
        cfg.level.clone()
    };
    let filter = EnvFilter::new(filter_str);

    let log_dir = data_dir.join("logs");
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir).context("create log directory")?;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, &cfg.file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer always JSON.
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let result = if cfg.format.as_str() == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if let Err(err) = result {
        static WARNED_ONCE: OnceLock<()> = OnceLock::new();
        // Common in tests when multiple runtimes initialize tracing.
        let msg = err.to_string();
        if !msg.contains("already set") && WARNED_ONCE.set(()).is_ok() {
            eprintln!("Tracing init failed (global subscriber already set?): {msg}");
        }
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoggingSection::default();
        let _guard = init(&cfg, dir.path()).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
