//! meshfs-utils: Common utilities for the MeshFS control panel
//!
//! Error types, logging setup, and path resolution shared by the bridge and
//! the control surface.

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{MeshError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
pub use paths::{
    config_dir, config_file, discover_project_root, log_dir, state_dir, venv_interpreter,
};
