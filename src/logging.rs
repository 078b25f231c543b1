use crate::config::LoggingConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "sqlprompt.log";

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string()))
}

/// Split a log file path into the directory to create and the file name.
fn log_location(file_path: &str) -> (PathBuf, PathBuf) {
    let path = Path::new(file_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    (dir, file)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
/// Keep the returned guard alive until exit so buffered file output is
/// flushed.
pub fn init(config: &LoggingConfig) -> io::Result<Option<WorkerGuard>> {
    let filter = env_filter(config);

    if config.file_output {
        let (dir, file) = log_location(&config.file_path);
        fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::never(&dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // A subscriber may already be installed (tests, embedding); keep it.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        return Ok(Some(guard));
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
    Ok(None)
}
