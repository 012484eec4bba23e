//! Logging infrastructure for meshfs
//!
//! Provides unified logging setup using the tracing ecosystem.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, MeshError, Result};

/// Environment variable holding the log filter
pub const LOG_ENV_VAR: &str = "MESHFS_LOG";

/// Default log file name inside [`paths::log_dir`]
pub const DEFAULT_LOG_FILE: &str = "meshfs.log";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file
    File,
    /// Log to both stderr and file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "debug", "meshfs_bridge=debug,tokio=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
    /// Optional custom log file name (defaults to "meshfs.log")
    pub file_name: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
            file_name: None,
        }
    }
}

/// Read a filter from `var`, falling back to `default`
fn filter_from_env(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.into())
}

impl LogConfig {
    /// Create config for the control panel
    ///
    /// Logs go to a file because stdout carries the panel's own output.
    pub fn panel() -> Self {
        Self {
            output: LogOutput::File,
            filter: filter_from_env(LOG_ENV_VAR, "info"),
            span_events: false,
            file_line: false,
            file_name: None,
        }
    }

    /// Create config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env(LOG_ENV_VAR, "debug"),
            span_events: true,
            file_line: true,
            file_name: None,
        }
    }
}

fn open_log_file(file_name: &str) -> Result<std::fs::File> {
    let log_dir = paths::log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|e| MeshError::FileWrite {
        path: log_dir.clone(),
        source: e,
    })?;

    let log_path = log_dir.join(file_name);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| MeshError::FileWrite {
            path: log_path,
            source: e,
        })
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| MeshError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let fmt_layer = if config.span_events {
        fmt_layer.with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    } else {
        fmt_layer
    };

    let fmt_layer = if config.file_line {
        fmt_layer.with_file(true).with_line_number(true)
    } else {
        fmt_layer.with_file(false).with_line_number(false)
    };

    let file_name = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| MeshError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let file = open_log_file(file_name)?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(file).with_ansi(false))
                .try_init()
                .map_err(|e| MeshError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::Both => {
            let file = open_log_file(file_name)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
                .map_err(|e| MeshError::internal(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== LogOutput Tests ====================

    #[test]
    fn test_log_output_equality() {
        assert_eq!(LogOutput::Stderr, LogOutput::Stderr);
        assert_ne!(LogOutput::Stderr, LogOutput::File);
        assert_ne!(LogOutput::File, LogOutput::Both);
    }

    #[test]
    fn test_log_output_debug() {
        assert_eq!(format!("{:?}", LogOutput::Stderr), "Stderr");
        assert_eq!(format!("{:?}", LogOutput::File), "File");
        assert_eq!(format!("{:?}", LogOutput::Both), "Both");
    }

    // ==================== LogConfig Tests ====================

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "info");
        assert!(!config.span_events);
        assert!(!config.file_line);
        assert!(config.file_name.is_none());
    }

    #[test]
    fn test_log_config_panel() {
        let config = LogConfig::panel();
        assert_eq!(config.output, LogOutput::File);
        assert!(!config.span_events);
    }

    #[test]
    fn test_log_config_development() {
        let config = LogConfig::development();
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.span_events);
        assert!(config.file_line);
    }

    #[test]
    fn test_filter_from_env_default() {
        let filter = filter_from_env("MESHFS_TEST_LOG_UNSET_VARIABLE", "warn");
        assert_eq!(filter, "warn");
    }

    #[test]
    fn test_filter_from_env_set() {
        std::env::set_var("MESHFS_TEST_LOG_FILTER_SET", "meshfs_bridge=trace");
        let filter = filter_from_env("MESHFS_TEST_LOG_FILTER_SET", "info");
        assert_eq!(filter, "meshfs_bridge=trace");
        std::env::remove_var("MESHFS_TEST_LOG_FILTER_SET");
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LogConfig {
            filter: "meshfs=notalevel[".into(),
            ..LogConfig::default()
        };
        let result = init_logging_with_config(config);
        assert!(matches!(result, Err(MeshError::Config(_))));
    }
}
