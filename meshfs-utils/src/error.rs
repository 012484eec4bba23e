//! Error types for the MeshFS control panel
//!
//! Provides a unified error type used across all meshfs crates.

use std::path::PathBuf;

/// Main error type for meshfs operations
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Process Errors ===

    #[error("Failed to launch backend {program}: {source}")]
    ProcessSpawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Backend process is not running")]
    NotRunning,

    #[error("Backend process is already running")]
    AlreadyRunning,

    // === Channel Errors ===

    #[error("Command buffer full ({capacity} pending)")]
    ChannelFull { capacity: usize },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if the operation may succeed later without user action
    ///
    /// Only a full command buffer qualifies; launch failures and a stopped
    /// backend need a fresh start.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelFull { .. })
    }
}

/// Result type alias using MeshError
pub type Result<T> = std::result::Result<T, MeshError>;
