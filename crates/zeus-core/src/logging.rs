//! Logging for the gateway process.
//!
//! Two sinks: a compact human-readable layer on stderr for interactive
//! runs, and a JSON-lines file under the log directory for long-running
//! deployments. The file sink records thread ids because gateway debugging
//! is mostly about interleavings between supervisor, fanout and client
//! tasks. Worker output is not logged here; the launch backend captures it
//! and serves it via `get_logs`.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, ZeusError};

/// File the JSON sink rotates daily under the log directory.
const LOG_FILE: &str = "zeus.jsonl";

/// Initialize gateway logging. Returns the appender guard; hold it for the
/// process lifetime so buffered entries are flushed on shutdown.
///
/// `RUST_LOG` overrides everything. Without it, zeus crates log at `info`
/// (`debug` with `verbose`) while transport crates (hyper, tungstenite,
/// tower) stay at `warn`: a busy fleet makes them far too chatty to leave
/// at the default level.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<WorkerGuard> {
    let dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };
    std::fs::create_dir_all(&dir).map_err(|e| ZeusError::DirectoryCreation {
        path: dir.clone(),
        source: e,
    })?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!(
            "warn,zeus={level},zeus_core={level},zeus_proto={level},zeus_gateway={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_writer(file_writer),
        )
        .init();

    tracing::debug!(log_dir = %dir.display(), verbose, "logging initialized");
    Ok(guard)
}

/// Console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info,zeus=debug"))
        .with_test_writer()
        .try_init();
}

/// Default log directory (`~/.zeus/logs/`).
pub fn default_log_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| ZeusError::Internal {
        message: "cannot resolve home directory".into(),
    })?;
    Ok(home.join(".zeus").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir() {
        let dir = default_log_dir().unwrap();
        assert!(dir.ends_with(".zeus/logs"));
    }

    #[test]
    fn test_init_test_logging() {
        // Safe to call more than once.
        init_test_logging();
        init_test_logging();
    }
}
