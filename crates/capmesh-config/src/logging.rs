// ── Tracing setup ──

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{ConfigError, LoggingOptions};

/// Install the global subscriber: `RUST_LOG` (or the configured level),
/// a stderr `fmt` layer and an optional non-blocking file layer.
///
/// Hold the returned guard for as long as file output should be flushed.
pub fn init_tracing(options: &LoggingOptions) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level).map_err(|e| ConfigError::Validation {
            field: "logging.level".into(),
            reason: e.to_string(),
        })?,
    };

    let (file_layer, guard) = match &options.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Tracing(e.to_string()))?;

    Ok(guard)
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, ConfigError> {
    let name = path.file_name().ok_or_else(|| ConfigError::Validation {
        field: "logging.file".into(),
        reason: format!("{} is not a file path", path.display()),
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    Ok(tracing_appender::rolling::never(dir, name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_a_validation_error() {
        // Only reached when RUST_LOG is unset or itself invalid.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let options = LoggingOptions {
            level: "capmesh_core=loud".into(),
            file: None,
        };
        assert!(matches!(
            init_tracing(&options),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn file_appender_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("capmesh.log");
        file_appender(&path).unwrap();
        assert!(dir.path().join("logs").is_dir());
        assert!(file_appender(Path::new("/")).is_err());
    }
}
