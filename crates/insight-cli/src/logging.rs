//! Tracing bootstrap.
//!
//! `INSIGHT_LOG` takes an `EnvFilter` directive. Without it the log file gets
//! `info` and the terminal only `warn`, so answers on stdout stay readable.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const ENV_VAR: &str = "INSIGHT_LOG";

fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs stderr and daily-rolling file output.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match logs_dir.map(daily_appender) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .with_filter(filter("info"));
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("Log file disabled: {e}");
            (None, None)
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter("warn"));

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn daily_appender(dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("insight.log")
        .build(dir)?)
}
