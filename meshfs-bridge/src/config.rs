//! Panel configuration loading
//!
//! Reads `panel.toml` from the meshfs config directory. Every field has a
//! default, so a missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use meshfs_protocol::{Command, StartPeer, DEFAULT_PEER_PORT, MAX_LINE_LENGTH};
use meshfs_utils::{paths, MeshError, Result};
use serde::Deserialize;

use crate::supervisor::{LaunchSpec, SupervisorOptions};

/// Python module that runs the backend command loop
pub const DEFAULT_BACKEND_MODULE: &str = "backend.cli";

/// Complete panel configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub backend: BackendConfig,
    pub peer: PeerConfig,
    pub bridge: BridgeConfig,
}

/// How to launch the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project root; discovered when unset
    pub project_root: Option<PathBuf>,
    /// Interpreter; `<project_root>/.venv/bin/python` when unset
    pub interpreter: Option<PathBuf>,
    pub module: String,
    /// Extra arguments appended after the module name
    pub args: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            interpreter: None,
            module: DEFAULT_BACKEND_MODULE.into(),
            args: Vec::new(),
        }
    }
}

/// Parameters for `START_PEER`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub port: u16,
    pub bootstrap_host: Option<String>,
    pub bootstrap_port: Option<u16>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PEER_PORT,
            bootstrap_host: None,
            bootstrap_port: None,
        }
    }
}

/// Buffer sizes and timeouts for the bridge
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Commands queued for the stdin writer
    pub command_buffer: usize,
    /// Decoded events queued for the router
    pub event_buffer: usize,
    /// Snapshots queued per state subscriber
    pub subscriber_buffer: usize,
    pub shutdown_grace_ms: u64,
    pub max_line_length: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            event_buffer: 256,
            subscriber_buffer: 64,
            shutdown_grace_ms: 1000,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl BridgeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            grace: self.shutdown_grace(),
            max_line_length: self.max_line_length,
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let buffers = [
            ("command_buffer", self.command_buffer),
            ("event_buffer", self.event_buffer),
            ("subscriber_buffer", self.subscriber_buffer),
            ("max_line_length", self.max_line_length),
        ];
        for (name, value) in buffers {
            if value == 0 {
                return Err(format!("bridge.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

impl PanelConfig {
    /// Load from the default location (`$XDG_CONFIG_HOME/meshfs/panel.toml`)
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file())
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| MeshError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::parse(&content).map_err(|message| MeshError::ConfigInvalid {
            path: path.to_path_buf(),
            message,
        })?;

        tracing::debug!(path = %path.display(), "Loaded panel config");
        Ok(config)
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        config.bridge.validate()?;
        Ok(config)
    }

    /// Absolute project root, discovering it from the current directory
    /// when unset
    pub fn project_root(&self) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.project_root_from(&cwd)
    }

    fn project_root_from(&self, cwd: &Path) -> PathBuf {
        let root = match &self.backend.project_root {
            Some(root) => root.clone(),
            None => paths::discover_project_root(cwd),
        };
        // Relative to our cwd, not the backend's
        cwd.join(root)
    }

    /// Build the backend invocation
    pub fn launch_spec(&self) -> LaunchSpec {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.launch_spec_from(&cwd)
    }

    fn launch_spec_from(&self, cwd: &Path) -> LaunchSpec {
        let root = self.project_root_from(cwd);
        let interpreter = match &self.backend.interpreter {
            // A bare name like `python3` is looked up on PATH
            Some(path) if path.components().count() > 1 => cwd.join(path),
            Some(path) => path.clone(),
            None => paths::venv_interpreter(&root),
        };

        LaunchSpec::python_module(interpreter, &self.backend.module, root)
            .with_args(self.backend.args.iter().cloned())
    }

    /// `START_PEER` for `port`, carrying the configured bootstrap server
    pub fn start_command(&self, port: u16) -> Command {
        let mut start = StartPeer::new(port);
        start.bootstrap_host = self.peer.bootstrap_host.clone();
        start.bootstrap_port = self.peer.bootstrap_port;
        Command::StartPeer(start)
    }
}
