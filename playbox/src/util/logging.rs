//! Tracing subscriber setup.
//!
//! Logs always go to stderr; stdout belongs to the output sink. With a log
//! directory configured, a daily-rolling file gets a copy.

use playbox_shared::errors::{PlayboxError, PlayboxResult};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "PLAYBOX_LOG";
const LOG_FILE_PREFIX: &str = "playbox.log";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Directory for rolling log files.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `PLAYBOX_LOG` is unset, `info` if `None`.
    pub filter: Option<String>,
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost.
pub fn init_logging(options: &LoggingOptions) -> PlayboxResult<Option<WorkerGuard>> {
    let default = options.filter.as_deref().unwrap_or("info");

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(default));

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(default));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PlayboxError::Internal(format!("failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoggingOptions {
            log_dir: Some(dir.path().join("logs")),
            filter: Some("debug".into()),
        };

        let first = init_logging(&options);
        let second = init_logging(&LoggingOptions::default());

        assert!(first.is_ok());
        assert!(dir.path().join("logs").is_dir());
        assert!(matches!(second, Err(PlayboxError::Internal(_))));
    }
}
