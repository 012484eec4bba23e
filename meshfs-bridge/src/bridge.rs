//! Bridge facade
//!
//! Ties the supervisor, command channel, router, and state store together
//! behind the two channels a control surface sees: commands `to-backend`
//! and decoded events `from-backend`.

use meshfs_protocol::{Command, Event};
use meshfs_utils::{MeshError, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::channel::CommandChannel;
use crate::config::PanelConfig;
use crate::router::{EventHandler, EventRouter};
use crate::state::{PeerStatus, StateStore, StateSubscription, UiState};
use crate::supervisor::{LaunchSpec, ProcessState, Supervisor};

/// Publishes every decoded event on the `from-backend` channel
struct Forwarder {
    tx: broadcast::Sender<Event>,
}

impl EventHandler for Forwarder {
    fn handle(&mut self, event: &Event) {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// IPC bridge to the MeshFS backend
pub struct Bridge {
    config: PanelConfig,
    launch: LaunchSpec,
    supervisor: Supervisor,
    store: StateStore,
    events: broadcast::Sender<Event>,
    router_task: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Create a bridge launching the backend described by `config`
    pub fn new(config: PanelConfig) -> Self {
        let launch = config.launch_spec();
        Self::with_launch_spec(config, launch)
    }

    /// Create a bridge with an explicit backend invocation
    pub fn with_launch_spec(config: PanelConfig, launch: LaunchSpec) -> Self {
        let supervisor = Supervisor::new(config.bridge.supervisor_options());
        let store = StateStore::new(config.bridge.subscriber_buffer);
        let (events, _) = broadcast::channel(config.bridge.event_buffer.max(1));

        Self {
            config,
            launch,
            supervisor,
            store,
            events,
            router_task: None,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Shared state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current UI state
    pub fn state(&self) -> UiState {
        self.store.snapshot()
    }

    /// Subscribe to UI state changes
    pub fn subscribe(&self) -> StateSubscription {
        self.store.subscribe()
    }

    /// Subscribe to decoded backend events (`from-backend`)
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn process_state(&self) -> ProcessState {
        self.supervisor.state()
    }

    /// Command channel to the running backend (`to-backend`)
    pub fn commands(&self) -> CommandChannel {
        self.supervisor.commands()
    }

    /// Spawn the backend
    ///
    /// A launch failure is reported as `Error` status and returned; it is
    /// not retried. The previous process's router is drained first so its
    /// last events land before anything from the new process.
    pub async fn launch(&mut self) -> Result<()> {
        if self.supervisor.state() == ProcessState::Running {
            return Err(MeshError::AlreadyRunning);
        }
        if let Some(previous) = self.router_task.take() {
            if let Err(e) = previous.await {
                tracing::error!(error = %e, "Event router task failed");
            }
        }

        let inbound = match self.supervisor.start(&self.launch) {
            Ok(inbound) => inbound,
            Err(MeshError::AlreadyRunning) => return Err(MeshError::AlreadyRunning),
            Err(e) => {
                tracing::error!(error = %e, "Failed to launch backend");
                self.store.set_status(PeerStatus::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let router = EventRouter::new(self.store.clone()).with_handler(Forwarder {
            tx: self.events.clone(),
        });
        self.router_task = Some(tokio::spawn(router.run(inbound)));
        Ok(())
    }

    /// Send any command to the backend without waiting
    pub fn send(&self, command: Command) -> Result<()> {
        self.supervisor.commands().send(command)
    }

    /// Ask the backend to start its peer on `port`
    ///
    /// Status becomes `Starting` unless the backend has already answered.
    pub fn start_peer(&self, port: u16) -> Result<()> {
        let revision = self.store.status_revision();
        self.send(self.config.start_command(port))?;
        self.store.mark_starting(revision);
        Ok(())
    }

    /// Ask the backend for its current peer roster
    pub fn request_peers(&self) -> Result<()> {
        self.send(Command::get_peers())
    }

    /// Request backend termination without waiting
    pub fn terminate(&mut self) {
        self.supervisor.terminate();
    }

    /// Terminate the backend and wait until its exit has been applied
    pub async fn shutdown(&mut self) {
        self.supervisor.shutdown().await;
        if let Some(task) = self.router_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Event router task failed");
            }
        }
    }

    /// Stop any running backend and launch a fresh one
    pub async fn restart(&mut self) -> Result<()> {
        tracing::info!("Restarting backend");
        self.shutdown().await;
        self.launch().await
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("launch", &self.launch)
            .field("process", &self.supervisor.state())
            .field("state", &self.store.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::path::PathBuf;

    fn missing_backend() -> Bridge {
        let dir = std::env::temp_dir().join("meshfs-bridge-test-missing");
        let config = PanelConfig {
            backend: BackendConfig {
                project_root: Some(dir.clone()),
                interpreter: Some(dir.join("no-such-python")),
                ..BackendConfig::default()
            },
            ..PanelConfig::default()
        };
        Bridge::new(config)
    }

    #[test]
    fn test_new_bridge_state() {
        let bridge = missing_backend();
        assert_eq!(bridge.state(), UiState::default());
        assert_eq!(bridge.process_state(), ProcessState::NotStarted);
        assert_eq!(bridge.launch_spec().args, vec!["-m", "backend.cli"]);
    }

    #[test]
    fn test_send_before_launch_not_running() {
        let bridge = missing_backend();
        let mut sub = bridge.subscribe();

        assert!(matches!(bridge.start_peer(65435), Err(MeshError::NotRunning)));
        assert!(matches!(bridge.request_peers(), Err(MeshError::NotRunning)));

        // A rejected start does not become Starting
        assert_eq!(bridge.state().status, PeerStatus::NotStarted);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_terminate_before_launch_is_noop() {
        let mut bridge = missing_backend();
        bridge.terminate();
        bridge.terminate();
        assert_eq!(bridge.state(), UiState::default());
    }

    #[tokio::test]
    async fn test_launch_failure_sets_error() {
        let mut bridge = missing_backend();
        let err = bridge.launch().await.unwrap_err();
        assert!(matches!(err, MeshError::ProcessSpawn { .. }));

        match bridge.state().status {
            PeerStatus::Error { message } => {
                assert!(message.contains("Failed to launch backend"));
                assert!(message.contains("no-such-python"));
            }
            other => panic!("Expected Error status, got {:?}", other),
        }
        assert_eq!(bridge.process_state(), ProcessState::NotStarted);
        assert_eq!(
            bridge.launch_spec().program,
            PathBuf::from(std::env::temp_dir().join("meshfs-bridge-test-missing/no-such-python"))
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_launch() {
        let mut bridge = missing_backend();
        bridge.shutdown().await;
        assert_eq!(bridge.state(), UiState::default());
    }

    #[test]
    fn test_forwarder_publishes_events() {
        let (tx, mut rx) = broadcast::channel(4);
        let mut forwarder = Forwarder { tx };
        forwarder.handle(&Event::PeerStarted { port: 1 });
        assert_eq!(rx.try_recv().unwrap(), Event::PeerStarted { port: 1 });
    }
}
