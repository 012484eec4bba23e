//! Outbound command channel
//!
//! Commands are queued on a bounded mpsc and written to the backend's stdin
//! by a single writer task, so they reach the backend in call order.

use futures::SinkExt;
use meshfs_protocol::{BridgeCodec, Command};
use meshfs_utils::{MeshError, Result};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::supervisor::ProcessState;

/// Handle for sending commands to the backend (`to-backend`)
///
/// Cheap to clone. A channel obtained while no backend is running stays
/// detached and rejects every command.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    link: Option<Link>,
}

#[derive(Debug, Clone)]
struct Link {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<ProcessState>,
}

impl CommandChannel {
    pub(crate) fn new(tx: mpsc::Sender<Command>, state: watch::Receiver<ProcessState>) -> Self {
        Self {
            link: Some(Link { tx, state }),
        }
    }

    /// A channel with no backend behind it
    pub fn detached() -> Self {
        Self { link: None }
    }

    /// Whether commands sent now would reach a live backend
    pub fn is_running(&self) -> bool {
        self.live_link().is_some()
    }

    fn live_link(&self) -> Option<&Link> {
        self.link
            .as_ref()
            .filter(|link| *link.state.borrow() == ProcessState::Running && !link.tx.is_closed())
    }

    /// Queue a command without waiting
    ///
    /// Fails with [`MeshError::NotRunning`] when no backend is running and
    /// with [`MeshError::ChannelFull`] when the writer has fallen behind.
    /// Nothing is queued on failure.
    pub fn send(&self, command: Command) -> Result<()> {
        let link = self.live_link().ok_or(MeshError::NotRunning)?;
        let command_type = command.command_type();

        link.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(command = command_type, "Command buffer full");
                MeshError::ChannelFull {
                    capacity: link.tx.max_capacity(),
                }
            }
            mpsc::error::TrySendError::Closed(_) => MeshError::NotRunning,
        })?;

        tracing::debug!(command = command_type, "Queued command");
        Ok(())
    }

    /// Queue a command, waiting for buffer space
    pub async fn send_async(&self, command: Command) -> Result<()> {
        let link = self.live_link().ok_or(MeshError::NotRunning)?;
        let command_type = command.command_type();

        link.tx
            .send(command)
            .await
            .map_err(|_| MeshError::NotRunning)?;

        tracing::debug!(command = command_type, "Queued command");
        Ok(())
    }
}

/// Write queued commands to `writer` until shutdown or a write failure
///
/// Returning drops the writer, which closes the backend's stdin.
pub(crate) async fn write_commands<W>(
    writer: W,
    mut rx: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, BridgeCodec::new());

    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let command_type = command.command_type();
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = framed.send(command) => result,
        };

        match result {
            Ok(()) => tracing::trace!(command = command_type, "Wrote command"),
            Err(e) => {
                tracing::warn!(command = command_type, error = %e, "Failed to write to backend stdin");
                break;
            }
        }
    }

    tracing::debug!("Command writer stopped");
}
