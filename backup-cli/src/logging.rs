// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_DIRECTIVES: &str = "backup_engine=info,backup_sys=info,snapshot_backup=info,warn";

pub fn log_file_name(now: chrono::DateTime<Local>) -> String {
    format!("backup_log_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

/// Stderr logging, plus a timestamped log file in `log_dir` when given
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(log_dir: Option<&Path>) -> Option<(WorkerGuard, PathBuf)> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let file = log_dir.map(|dir| (dir, file_writer(dir)));
    match file {
        Some((_, Ok((writer, guard, path)))) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some((guard, path))
        }
        Some((dir, Err(e))) => {
            eprintln!(
                "snapshot-backup: failed to create log file in {}: {e:#}",
                dir.display()
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            None
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn file_writer(
    dir: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard, PathBuf)> {
    fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("create log directory failed: {} ({e})", dir.display()))?;

    let name = log_file_name(Local::now());
    let path = dir.join(&name);
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&name)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard, path))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_file_is_named_after_start_time() {
        let start = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous local time");
        assert_eq!(log_file_name(start), "backup_log_20240309_070501.txt");
    }
}
