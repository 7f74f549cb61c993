//! Tracing initialization with configurable console formats and an optional
//! append-only log file.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the tracing subscriber with the given configuration.
///
/// This sets up:
/// - Console logging with configurable format (pretty, compact, JSON)
/// - Environment-based log filtering (`RUST_LOG` wins over the config)
/// - A plain-text copy of every line in `logging.file`, if configured
pub fn init_tracing(config: &ObservabilityConfig) -> Result<TracingGuard, TracingError> {
    let logging = &config.logging;
    let filter = build_env_filter(logging);

    let mut layers: Vec<BoxedLayer> = vec![console_layer(logging)];

    let log_file = match &logging.file {
        Some(path) => {
            let file = Arc::new(open_log_file(path)?);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(file.clone())
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .boxed(),
            );
            Some(file)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    if let Some(path) = &logging.file {
        tracing::debug!(path = %path.display(), "Writing logs to file");
    }

    Ok(TracingGuard { log_file })
}

fn console_layer(logging: &LoggingConfig) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    match (&logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().with_target(true).boxed(),
        (LogFormat::Pretty, false) => base.pretty().with_target(true).without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().with_target(true).boxed(),
        (LogFormat::Compact, false) => base.compact().with_target(true).without_time().boxed(),
        (LogFormat::Json, true) => base.json().with_current_span(true).boxed(),
        (LogFormat::Json, false) => base.json().with_current_span(true).without_time().boxed(),
    }
}

fn open_log_file(path: &Path) -> Result<File, TracingError> {
    let log_err = |source| TracingError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(log_err)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)
}

/// Build the environment filter from logging config.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_str();

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        // Default filter that quiets noisy crates
        EnvFilter::new(format!(
            "{},sqlx=warn,hyper=warn,h2=warn,aws_config=warn,aws_smithy_runtime=warn,aws_sdk_s3=warn",
            base_level
        ))
    }
}

/// Keeps the log file open for the life of the process and flushes it on drop.
pub struct TracingGuard {
    log_file: Option<Arc<File>>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.log_file
            && let Err(e) = file.sync_all()
        {
            eprintln!("Error flushing log file: {:?}", e);
        }
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_default_filter_quiets_dependencies() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter = build_env_filter(&LoggingConfig::default()).to_string();
            assert!(filter.contains("info"));
            assert!(filter.contains("sqlx=warn"));
            assert!(filter.contains("aws_smithy_runtime=warn"));
        });
    }

    #[test]
    fn test_config_filter_appended() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                level: LogLevel::Debug,
                filter: Some("table_archiver=trace".to_string()),
                ..Default::default()
            };
            let filter = build_env_filter(&config).to_string();
            assert!(filter.contains("debug"));
            assert!(filter.contains("table_archiver=trace"));
        });
    }

    #[test]
    fn test_rust_log_overrides_config() {
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            let config = LoggingConfig {
                filter: Some("table_archiver=trace".to_string()),
                ..Default::default()
            };
            assert_eq!(build_env_filter(&config).to_string(), "warn");
        });
    }

    #[test]
    fn test_open_log_file_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("archive_process.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous run\n").unwrap();

        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "this run").unwrap();
        }

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "previous run\nthis run\n"
        );
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("logs").join("a.log");

        open_log_file(&path).unwrap();

        assert!(path.exists());
    }
}
