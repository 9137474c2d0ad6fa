//! tracing subscriber setup.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Directory for daily rolling log files; console only when `None`
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Install the global subscriber. Calling it again is a no-op.
///
/// Console output goes to stderr so it does not interleave with the CLI's
/// own status lines on stdout.
pub fn init_tracing(config: &LogConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let registry = Registry::default().with(env_filter).with(stderr_layer);

    let result = match &config.log_dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("moodpulse")
                .filename_suffix("log")
                .max_log_files(14)
                .build(dir)
                .map_err(|e| format!("could not create log directory {}: {e}", dir.display()))?;
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };

    match result {
        Ok(()) => Ok(()),
        // either the dispatcher or the log bridge was installed earlier
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
