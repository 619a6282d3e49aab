use std::fs;
use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "doorcount";
pub const DEFAULT_LOG_FILE_SUFFIX: &str = "log";

/// Inputs to logging initialization, collected before any subscriber is
/// installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub default_log_filter: String,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbose: 0,
            cli_log_filter: None,
            rust_log_env: None,
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

/// Whether a persistent file sink could be prepared; a fallback plan
/// carries the reason so the caller can warn and continue console-only.
#[derive(Debug)]
pub enum FileSinkPlan {
    Ready(ReadyFileSinkPlan),
    Fallback(FallbackFileSinkPlan),
}

#[derive(Debug)]
pub struct ReadyFileSinkPlan {
    pub log_dir: PathBuf,
    pub retention_files: usize,
    pub appender: RollingFileAppender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFileSinkPlan {
    pub attempted_log_dir: Option<PathBuf>,
    pub retention_files: usize,
    pub reason: String,
}

impl FileSinkPlan {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Fallback(plan) => Some(plan.reason.as_str()),
        }
    }
}

/// Filter precedence: explicit CLI filter > `-v`/`-vv` > `RUST_LOG` >
/// the configured default.
pub fn select_log_filter(options: &LoggingInitOptions) -> String {
    if let Some(filter) = options.cli_log_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        options.default_log_filter.clone()
    }
}

/// Prepare a daily-rolling file sink under `<data_dir>/logs`.
pub fn build_file_sink_plan(options: &LoggingInitOptions) -> FileSinkPlan {
    let retention_files = normalize_retention_files(options.retention_files);

    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: None,
            retention_files,
            reason: "file sink disabled: data_dir is not configured".to_string(),
        });
    };

    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            retention_files,
            reason: format!("failed to create log directory: {error}"),
        });
    }

    let appender_builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix(DEFAULT_LOG_FILE_SUFFIX)
        .max_log_files(retention_files);

    match appender_builder.build(log_dir.as_path()) {
        Ok(appender) => FileSinkPlan::Ready(ReadyFileSinkPlan {
            log_dir,
            retention_files,
            appender,
        }),
        Err(error) => FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            retention_files,
            reason: format!("failed to initialize rolling file sink: {error}"),
        }),
    }
}

fn normalize_retention_files(retention_files: usize) -> usize {
    if retention_files == 0 {
        DEFAULT_LOG_RETENTION_FILES
    } else {
        retention_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LoggingInitOptions {
        LoggingInitOptions::default()
    }

    #[test]
    fn default_filter_when_nothing_is_set() {
        assert_eq!(select_log_filter(&options()), "info");
    }

    #[test]
    fn rust_log_env_overrides_default() {
        let selected = select_log_filter(&LoggingInitOptions {
            rust_log_env: Some("doorcount_core=debug".to_string()),
            ..options()
        });
        assert_eq!(selected, "doorcount_core=debug");
    }

    #[test]
    fn verbose_flag_overrides_rust_log() {
        let selected = select_log_filter(&LoggingInitOptions {
            rust_log_env: Some("warn".to_string()),
            verbose: 1,
            ..options()
        });
        assert_eq!(selected, "debug");
    }

    #[test]
    fn double_verbose_enables_trace() {
        let selected = select_log_filter(&LoggingInitOptions {
            verbose: 2,
            ..options()
        });
        assert_eq!(selected, "trace");
    }

    #[test]
    fn explicit_log_filter_has_highest_precedence() {
        let selected = select_log_filter(&LoggingInitOptions {
            rust_log_env: Some("warn".to_string()),
            verbose: 2,
            cli_log_filter: Some("doorcount_core=trace".to_string()),
            ..options()
        });
        assert_eq!(selected, "doorcount_core=trace");
    }

    #[test]
    fn file_sink_without_data_dir_falls_back() {
        let plan = build_file_sink_plan(&options());
        assert!(!plan.is_ready());
        assert!(plan
            .fallback_reason()
            .is_some_and(|reason| reason.contains("data_dir")));
    }

    #[test]
    fn file_sink_creates_log_dir() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let plan = build_file_sink_plan(&LoggingInitOptions {
            data_dir: Some(temp.path().to_path_buf()),
            ..options()
        });

        assert!(plan.is_ready());
        assert!(temp.path().join(DEFAULT_LOG_DIR_NAME).is_dir());
    }

    #[test]
    fn zero_retention_normalizes_to_default() {
        let plan = build_file_sink_plan(&LoggingInitOptions {
            retention_files: 0,
            ..options()
        });
        match plan {
            FileSinkPlan::Fallback(fallback) => {
                assert_eq!(fallback.retention_files, DEFAULT_LOG_RETENTION_FILES);
            }
            FileSinkPlan::Ready(_) => panic!("expected fallback without data_dir"),
        }
    }
}
