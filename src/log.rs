//! Logging setup, selected by `log_type`/`log_level` from the live
//! configuration.
//!
//! Built on `tracing` + `tracing-subscriber`, matching the teacher's own
//! logging stack. A `syslog` `log_type` has no portable OS integration
//! available here, so it logs a startup warning and falls back to the
//! console sink rather than silently dropping log output.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::config::{LogMode, LogType};
use crate::error::Result;

/// Cross-process log-rotation guard. Ordinary log emission goes through
/// `tracing`'s own internal synchronization; this guards only the
/// specific rotate/reopen race on the log file.
pub const STATE_FREE: u8 = 0;
pub const STATE_IN_USE: u8 = 1;

/// Atomic log-rotation lock, shared by all workers touching the same log
/// file.
pub struct LogLock(AtomicU8);

impl LogLock {
    pub const fn new() -> Self {
        Self(AtomicU8::new(STATE_FREE))
    }

    /// Try to acquire the lock for rotation. Returns `true` on success.
    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(STATE_FREE, STATE_IN_USE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(STATE_FREE, Ordering::Release);
    }
}

impl Default for LogLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global `tracing` subscriber per the resolved `log_type`.
///
/// `log_path` is required when `log_type` is `File`; if absent, falls
/// back to console with a warning.
pub fn init(
    log_type: LogType,
    level: tracing::Level,
    log_path: Option<&std::path::Path>,
    log_mode: LogMode,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::from_level(level).into())
        .from_env_lossy();

    match log_type {
        LogType::Console => {
            fmt().with_env_filter(filter).with_target(true).init();
            Ok(None)
        }
        LogType::Syslog => {
            // No portable syslog sink is wired up here; fall back to console
            // after logging why.
            fmt().with_env_filter(filter).with_target(true).init();
            tracing::warn!("log_type=syslog requested but no syslog sink is available, falling back to console");
            Ok(None)
        }
        LogType::File => {
            let Some(path) = log_path else {
                fmt().with_env_filter(filter).with_target(true).init();
                tracing::warn!("log_type=file requested but log_path is unset, falling back to console");
                return Ok(None);
            };

            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("pgvictoria.log"));

            if log_mode == LogMode::Create {
                let _ = std::fs::remove_file(path);
            }

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();

            Ok(Some(guard))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lock_allows_exclusive_acquisition() {
        let lock = LogLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
    }
}
