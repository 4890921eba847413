use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_FILTER: &str = "info,beatglitch_core=debug";
pub const DEFAULT_FILE_PREFIX: &str = "beatglitch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryOptions {
    pub log_dir: PathBuf,
    pub file_prefix: String,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Headless renders may want the file only.
    pub stdout: bool,
}

impl TelemetryOptions {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            default_filter: DEFAULT_FILTER.to_string(),
            stdout: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &DiagnosticsConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            file_prefix: config.trace_file_prefix.clone(),
            default_filter: config.rust_log_filter.clone(),
            stdout: true,
        }
    }
}

/// Keeps the file writer flushing; drop it last.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_path: PathBuf,
    _file_guard: WorkerGuard,
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(&TelemetryOptions::new(log_dir.as_ref()))
}

pub fn init_tracing_from_config(config: &DiagnosticsConfig) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(&TelemetryOptions::from_config(config))
}

/// A second call in the same process keeps the first subscriber and only warns.
pub fn init_tracing_with_options(options: &TelemetryOptions) -> anyhow::Result<TelemetryGuard> {
    let log_dir = options.log_dir.as_path();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let file_name = log_file_name(&options.file_prefix, Utc::now(), session_id);
    let log_path = log_dir.join(&file_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let stdout_layer = options.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(true)
            .with_target(true)
    });
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => info!(%session_id, log = %log_path.display(), "tracing initialized"),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_path,
        _file_guard: file_guard,
    })
}

/// `<prefix>-<utc timestamp>-<first 8 hex of the session id>.log`, so parallel
/// runs started in the same second never share a file.
fn log_file_name(prefix: &str, now: DateTime<Utc>, session_id: Uuid) -> String {
    let short_id = &session_id.simple().to_string()[..8];
    format!("{prefix}-{}-{short_id}.log", now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_files_are_named_by_time_and_session() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
            .single()
            .expect("timestamp is valid");
        let session_id =
            Uuid::parse_str("0123abcd-0000-4000-8000-000000000000").expect("uuid is valid");
        assert_eq!(
            log_file_name("beatglitch", now, session_id),
            "beatglitch-20260314-092653-0123abcd.log"
        );
    }

    #[test]
    fn options_follow_the_diagnostics_config() {
        let config = DiagnosticsConfig::default();
        let options = TelemetryOptions::from_config(&config);
        assert_eq!(options.file_prefix, DEFAULT_FILE_PREFIX);
        assert_eq!(options.default_filter, DEFAULT_FILTER);
        assert!(options.stdout);
    }
}
