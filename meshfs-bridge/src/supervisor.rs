//! Backend process supervision
//!
//! The supervisor owns the backend subprocess. stdout carries the protocol
//! and is decoded into [`Inbound`] items in stream order; stderr is
//! diagnostic output and only logged; stdin is fed by the command writer.
//!
//! There is no automatic restart. Once the process exits the supervisor
//! reports it and stays `Terminated` until started again.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::StreamExt;
use meshfs_protocol::{BridgeCodec, DecodeError, Event, MAX_LINE_LENGTH};
use meshfs_utils::{MeshError, Result};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::channel::{self, CommandChannel};

/// Tracing target for lines the backend writes to stderr
pub const BACKEND_LOG_TARGET: &str = "meshfs::backend";

/// Lifecycle of the backend process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    NotStarted,
    Running,
    Terminated,
}

/// How the backend process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit status, if it could be collected
    pub status: Option<ExitStatus>,
    /// Whether the exit followed a termination request
    pub requested: bool,
}

impl ExitReport {
    /// Human readable exit status
    pub fn describe(&self) -> String {
        match self.status {
            Some(status) => status.to_string(),
            None => "status unknown".to_string(),
        }
    }
}

/// Items produced from the backend's stdout, in stream order
#[derive(Debug)]
pub enum Inbound {
    Event(Event),
    Malformed(DecodeError),
    /// Always the last item for a process
    Exited(ExitReport),
}

/// Tunables for a supervised process
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How long to wait at each termination step
    pub grace: Duration,
    pub max_line_length: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(1),
            max_line_length: MAX_LINE_LENGTH,
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

/// Program, arguments, and working directory of the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    /// `<interpreter> -m <module>` run from `project_root`
    pub fn python_module(
        interpreter: impl Into<PathBuf>,
        module: &str,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self::new(interpreter, project_root).with_args(["-m".to_string(), module.to_string()])
    }

    /// Append arguments (builder pattern)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

struct BackendProcess {
    pid: Option<u32>,
    commands: CommandChannel,
    state: watch::Receiver<ProcessState>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Owner of the backend subprocess
pub struct Supervisor {
    options: SupervisorOptions,
    process: Option<BackendProcess>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            process: None,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Spawn the backend and start pumping its streams
    ///
    /// Returns the receiving end of the inbound stream. The process is
    /// killed if the supervisor is dropped without terminating it.
    pub fn start(&mut self, spec: &LaunchSpec) -> Result<mpsc::Receiver<Inbound>> {
        if self.is_live() {
            return Err(MeshError::AlreadyRunning);
        }

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeshError::ProcessSpawn {
                program: spec.program.clone(),
                source: e,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MeshError::internal("backend stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MeshError::internal("backend stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MeshError::internal("backend stderr was not captured"))?;

        let pid = child.id();
        tracing::info!(
            pid,
            program = %spec.program.display(),
            cwd = %spec.working_dir.display(),
            "Backend started"
        );

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (command_tx, command_rx) = mpsc::channel(self.options.command_buffer.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.options.event_buffer.max(1));
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(channel::write_commands(stdin, command_rx, shutdown.clone()));
        tokio::spawn(log_stderr(stderr, self.options.max_line_length));

        let task = tokio::spawn(supervise(
            child,
            Pump {
                stdout,
                inbound: inbound_tx,
                state: state_tx,
                shutdown: shutdown.clone(),
                writer,
                grace: self.options.grace,
                max_line_length: self.options.max_line_length,
            },
        ));

        self.process = Some(BackendProcess {
            pid,
            commands: CommandChannel::new(command_tx, state_rx.clone()),
            state: state_rx,
            shutdown,
            task: Some(task),
        });

        Ok(inbound_rx)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.process
            .as_ref()
            .map(|p| *p.state.borrow())
            .unwrap_or_default()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid)
    }

    /// Handle for sending commands to the current process
    pub fn commands(&self) -> CommandChannel {
        self.process
            .as_ref()
            .map(|p| p.commands.clone())
            .unwrap_or_else(CommandChannel::detached)
    }

    /// Process alive and not yet asked to stop
    fn is_live(&self) -> bool {
        self.process
            .as_ref()
            .map(|p| *p.state.borrow() == ProcessState::Running)
            .unwrap_or(false)
    }

    /// Request termination without waiting for it
    ///
    /// A no-op when nothing is running or termination was already requested.
    pub fn terminate(&mut self) {
        let Some(process) = &self.process else {
            return;
        };
        if process.shutdown.is_cancelled() {
            return;
        }
        if *process.state.borrow() == ProcessState::Running {
            tracing::info!(pid = process.pid, "Terminating backend");
        }
        process.shutdown.cancel();
    }

    /// Terminate and wait until the process is gone and its exit reported
    pub async fn shutdown(&mut self) {
        self.terminate();
        let Some(task) = self.process.as_mut().and_then(|p| p.task.take()) else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Backend supervision task failed");
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Everything the supervision task needs besides the child
struct Pump {
    stdout: ChildStdout,
    inbound: mpsc::Sender<Inbound>,
    state: watch::Sender<ProcessState>,
    shutdown: CancellationToken,
    writer: JoinHandle<()>,
    grace: Duration,
    max_line_length: usize,
}

async fn supervise(mut child: Child, pump: Pump) {
    let Pump {
        stdout,
        inbound,
        state,
        shutdown,
        writer,
        grace,
        max_line_length,
    } = pump;

    let mut reader = FramedRead::new(stdout, BridgeCodec::with_max_line_length(max_line_length));

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = reader.next() => frame,
        };

        let item = match frame {
            Some(Ok(Ok(event))) => Inbound::Event(event),
            Some(Ok(Err(e))) => Inbound::Malformed(e),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read backend stdout");
                break;
            }
            None => {
                tracing::debug!("Backend stdout closed");
                break;
            }
        };

        if inbound.send(item).await.is_err() {
            tracing::trace!("Inbound receiver gone, discarding backend output");
        }
    }
    drop(reader);

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = shutdown.cancelled() => None,
    };

    let status = match exited {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Failed to collect backend exit status");
            None
        }
        None => {
            // Writer stops on cancellation, which closes stdin
            if let Err(e) = writer.await {
                tracing::warn!(error = %e, "Command writer task failed");
            }
            stop_child(&mut child, grace).await
        }
    };

    let requested = shutdown.is_cancelled();
    shutdown.cancel();
    let _ = state.send(ProcessState::Terminated);

    let report = ExitReport { status, requested };
    if requested {
        tracing::info!(status = %report.describe(), "Backend stopped");
    } else {
        tracing::warn!(status = %report.describe(), "Backend exited unexpectedly");
    }

    let _ = inbound.send(Inbound::Exited(report)).await;
}

/// Escalate from stdin EOF to SIGTERM to SIGKILL
async fn stop_child(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
        return Some(status);
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            tracing::debug!(pid, "Backend still running after stdin closed, sending SIGTERM");
            // SAFETY: pid is our own child, not yet reaped
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                return Some(status);
            }
        }
    }

    tracing::warn!(pid = child.id(), "Backend did not stop, killing");
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill backend");
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to collect backend exit status");
            None
        }
    }
}

/// Forward backend stderr to the log, one event per line
///
/// Lines longer than `max_line_length` and lines that are not UTF-8 are
/// dropped with a warning. Returns how many lines were logged.
async fn log_stderr<R: AsyncRead + Unpin>(stderr: R, max_line_length: usize) -> usize {
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(max_line_length));
    let mut logged = 0;

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::info!(target: BACKEND_LOG_TARGET, "{}", line);
                    logged += 1;
                }
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!(max_line_length, "Dropped oversized backend stderr line");
                // A decoder error is followed by one None before reading resumes
                let _ = lines.next().await;
            }
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!("Dropped non UTF-8 backend stderr line");
                let _ = lines.next().await;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Backend stderr read failed");
                break;
            }
        }
    }
    logged
}
