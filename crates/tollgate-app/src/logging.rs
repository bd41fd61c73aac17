//! Logging initialisation.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directive for a level, keeping dependencies at `warn`.
pub fn default_directive(level: &str) -> String {
    format!("tollgate={level},tollgate_core={level},tollgate_storage={level},tollgate_proxy={level},tollgate_server={level},tollgate_app={level},warn")
}

/// Initialises logging to stdout and a daily rolling file in `log_dir`.
///
/// Falls back to console-only logging when the directory cannot be used.
/// Keep the returned guard alive for the lifetime of the program.
pub fn init(level: &str, log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .max_log_files(5)
            .filename_prefix("tollgate")
            .filename_suffix("log")
            .build(log_dir)
            .ok();

        if let Some(appender) = file_appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stdout))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            tracing::info!("Logging to {:?}", log_dir);
            return Some(guard);
        }
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parses() {
        let directive = default_directive("debug");
        assert!(directive.starts_with("tollgate=debug,"));
        assert!(directive.ends_with(",warn"));
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
