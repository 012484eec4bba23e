//! meshfs - control panel for the MeshFS peer backend
//!
//! Launches the backend, reads slash commands from stdin, and prints every
//! state change. The backend is shut down on `/quit`, end of input, or
//! Ctrl-C.

use std::ops::ControlFlow;

use meshfs_bridge::{Bridge, PanelConfig};
use meshfs_utils::{init_logging_with_config, LogConfig, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

mod cli;
mod commands;
mod render;

use cli::Args;
use commands::{parse_command, PanelCommand, ParseError, HELP};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let log_config = if args.verbose {
        LogConfig::development()
    } else {
        LogConfig::panel()
    };
    init_logging_with_config(log_config)?;
    tracing::info!("meshfs panel starting");
    tracing::debug!("CLI args: {:?}", args);

    match run(args).await {
        Ok(()) => {
            tracing::info!("meshfs panel exiting normally");
            Ok(())
        }
        Err(e) => {
            tracing::error!("meshfs panel error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

fn load_config(args: &Args) -> Result<PanelConfig> {
    let mut config = match &args.config {
        Some(path) => PanelConfig::load_from(path)?,
        None => PanelConfig::load()?,
    };
    args.apply(&mut config);
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let default_port = config.peer.port;

    let mut bridge = Bridge::new(config);
    let mut updates = bridge.subscribe();
    tracing::info!(launch = ?bridge.launch_spec(), "Launching backend");

    println!("{}", launch(&mut bridge).await);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("stdin closed");
                    break;
                };
                if handle_line(&mut bridge, &line, default_port).await.is_break() {
                    break;
                }
            }
            state = updates.recv() => match state {
                Some(state) => println!("{}", render::render_state(&state)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}

/// Launch the backend and render the state it left behind
async fn launch(bridge: &mut Bridge) -> String {
    // A failed launch is already reflected in the status
    let _ = bridge.launch().await;
    render::render_state(&bridge.state())
}

async fn handle_line(bridge: &mut Bridge, line: &str, default_port: u16) -> ControlFlow<()> {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(ParseError::Empty) => return ControlFlow::Continue(()),
        Err(e) => {
            eprintln!("{}", e);
            return ControlFlow::Continue(());
        }
    };

    let result = match command {
        PanelCommand::Start(port) => bridge.start_peer(port.unwrap_or(default_port)),
        PanelCommand::Peers => bridge.request_peers(),
        PanelCommand::Status => {
            println!("{}", render::render_state(&bridge.state()));
            Ok(())
        }
        PanelCommand::Restart => bridge.restart().await,
        PanelCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        PanelCommand::Quit => return ControlFlow::Break(()),
        PanelCommand::Unknown(name) => {
            eprintln!("unknown command: /{} (try /help)", name);
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
    }
    ControlFlow::Continue(())
}
