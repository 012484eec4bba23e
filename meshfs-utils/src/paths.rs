//! Path utilities for meshfs
//!
//! XDG directories for the panel's own files, plus resolution of the backend
//! project root and its virtual-environment interpreter.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "meshfs";

/// Environment variable overriding project root discovery
pub const PROJECT_ROOT_ENV_VAR: &str = "MESHFS_PROJECT_ROOT";

/// Directory that marks a MeshFS project root
const BACKEND_PACKAGE_DIR: &str = "backend";

/// Virtual environment directory relative to the project root
const VENV_DIR: &str = ".venv";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/meshfs` or `~/.config/meshfs`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config").join(APP_NAME))
}

/// Get the panel configuration file path
///
/// Location: `$XDG_CONFIG_HOME/meshfs/panel.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("panel.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/meshfs` or `~/.local/state/meshfs`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| home_dir().join(".local").join("state").join(APP_NAME))
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/meshfs/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Interpreter inside the project's virtual environment
///
/// Location: `<root>/.venv/bin/python`, or `<root>\.venv\Scripts\python.exe`
/// on Windows.
pub fn venv_interpreter(project_root: &Path) -> PathBuf {
    let venv = project_root.join(VENV_DIR);
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// Find the backend project root
///
/// `MESHFS_PROJECT_ROOT` wins when set. Otherwise walks up from `start` to the
/// first directory containing a `backend` package, falling back to `start`.
pub fn discover_project_root(start: &Path) -> PathBuf {
    if let Some(root) = std::env::var_os(PROJECT_ROOT_ENV_VAR) {
        return PathBuf::from(root);
    }
    find_project_root(start).unwrap_or_else(|| start.to_path_buf())
}

fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(BACKEND_PACKAGE_DIR).is_dir())
        .map(Path::to_path_buf)
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
