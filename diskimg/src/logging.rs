// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Overrides the `log_file` configuration key
pub const LOG_FILE_ENV: &str = "DISKIMG_LOG_FILE";

const DEFAULT_LOG_NAME: &str = "diskimg.log";
const CRATES: [&str; 4] = ["diskimg", "diskimg_sys", "diskimgcreator", "diskimgmounter"];

/// Filter used when `RUST_LOG` is unset: our crates at the level picked by
/// `-v`, everything else at warn.
pub fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut directives: Vec<String> = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect();
    directives.push("warn".to_string());
    directives.join(",")
}

/// Install the global subscriber: stderr always, plus a plain-text file when
/// `log_file` or `DISKIMG_LOG_FILE` names one.
pub fn init(verbosity: u8, log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0);

    let target = std::env::var_os(LOG_FILE_ENV)
        .map(PathBuf::from)
        .or_else(|| log_file.map(Path::to_path_buf));

    let file_layer = match target.as_deref().map(file_writer) {
        Some(Ok((writer, guard))) => {
            // Keep the background writer alive for the whole process.
            let _ = LOG_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false),
            )
        }
        Some(Err(e)) => {
            eprintln!("diskimg: failed to open log file: {e}");
            None
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

fn split_log_path(path: &Path) -> (PathBuf, OsString) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(DEFAULT_LOG_NAME));
    (dir, name)
}

fn file_writer(path: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    let (dir, name) = split_log_path(path);
    fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::never(&dir, &name);
    Ok(tracing_appender::non_blocking(appender))
}
