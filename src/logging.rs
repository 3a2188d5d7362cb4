//! Tracing setup for the `docsite` CLI.
//!
//! Command output goes to stdout, so log lines go to stderr (terse, no
//! timestamps) and to `logs/docsite_<launch time>.log` in the app directory
//! (full detail). Only the newest [`KEPT_LOG_FILES`] files survive a launch.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};

pub const KEPT_LOG_FILES: usize = 10;

const FILE_STAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
const LINE_STAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

static FILE_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    #[error("Cannot {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("Cannot name log file: {0}")]
    Stamp(#[from] time::error::Format),
    #[error("Tracing already installed: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Only the first call does anything.
pub fn init(default_filter: &str) -> Result<(), LoggingError> {
    if FILE_WRITER_GUARD.get().is_some() {
        return Ok(());
    }
    let dir = app_dirs::logs_dir()?;
    let path = start_log_file(&dir, launch_time())?;
    remove_stale_logs(&dir, KEPT_LOG_FILES)?;

    let Some(file_name) = path.file_name() else {
        return Ok(());
    };
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, file_name));
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(fmt::time::OffsetTime::new(offset, LINE_STAMP))
        .with_writer(file_writer);
    let stderr_layer = fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(io::stderr);

    tracing::subscriber::set_global_default(
        Registry::default()
            .with(env_filter(default_filter))
            .with(stderr_layer)
            .with(file_layer),
    )?;
    let _ = FILE_WRITER_GUARD.set(guard);
    tracing::debug!("Writing log to {}", path.display());
    Ok(())
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn launch_time() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn log_file_name(launched: OffsetDateTime) -> Result<String, LoggingError> {
    Ok(format!("docsite_{}.log", launched.format(FILE_STAMP)?))
}

/// Create this launch's log file so pruning never deletes it.
fn start_log_file(dir: &Path, launched: OffsetDateTime) -> Result<PathBuf, LoggingError> {
    let path = dir.join(log_file_name(launched)?);
    File::options()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::Io {
            action: "create log file",
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

fn remove_stale_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let mut logs = log_files(dir).map_err(|source| LoggingError::Io {
        action: "list",
        path: dir.to_path_buf(),
        source,
    })?;
    // Newest first.
    logs.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in logs.into_iter().skip(keep) {
        fs::remove_file(&path).map_err(|source| LoggingError::Io {
            action: "remove old log",
            path,
            source,
        })?;
    }
    Ok(())
}

fn log_files(dir: &Path) -> io::Result<Vec<(SystemTime, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            found.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn file_name_uses_launch_time() {
        let launched = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            log_file_name(launched).unwrap(),
            "docsite_2023-11-14_22-13-20.log"
        );
    }

    #[test]
    fn stale_logs_are_removed_oldest_first() {
        let dir = tempdir().unwrap();
        for second in 0..4 {
            start_log_file(
                dir.path(),
                OffsetDateTime::from_unix_timestamp(1_700_000_000 + second).unwrap(),
            )
            .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        remove_stale_logs(dir.path(), 2).unwrap();

        let mut left: Vec<_> = log_files(dir.path())
            .unwrap()
            .into_iter()
            .filter_map(|(_, path)| path.file_name()?.to_str().map(str::to_string))
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "docsite_2023-11-14_22-13-22.log",
                "docsite_2023-11-14_22-13-23.log"
            ]
        );
        assert!(dir.path().join("notes.txt").exists());
    }
}
