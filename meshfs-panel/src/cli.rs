//! Command-line argument parsing for the meshfs panel
//!
//! Uses clap for argument parsing with derive macros. Flags override values
//! from `panel.toml`.

use clap::Parser;
use meshfs_bridge::PanelConfig;
use std::path::PathBuf;

/// meshfs - control panel for the MeshFS peer backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// MeshFS project root
    ///
    /// Directory containing the `backend` package and `.venv`. Discovered
    /// from the current directory when omitted.
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Python interpreter (defaults to the project's .venv)
    #[arg(long, env = "MESHFS_PYTHON")]
    pub python: Option<PathBuf>,

    /// Backend module to run with `python -m`
    #[arg(long)]
    pub module: Option<String>,

    /// Default port for /start
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Config file (defaults to ~/.config/meshfs/panel.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr instead of the log file
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply flag overrides on top of a loaded config
    pub fn apply(&self, config: &mut PanelConfig) {
        if let Some(root) = &self.project_root {
            config.backend.project_root = Some(root.clone());
        }
        if let Some(python) = &self.python {
            config.backend.interpreter = Some(python.clone());
        }
        if let Some(module) = &self.module {
            config.backend.module = module.clone();
        }
        if let Some(port) = self.port {
            config.peer.port = port;
        }
    }
}
