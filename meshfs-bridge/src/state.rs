//! Reconciled view of backend state
//!
//! The store holds the latest [`UiState`] and broadcasts a fresh snapshot
//! after every mutation. Each mutation touches either the status or the peer
//! roster, never both, and is applied under the same lock that publishes it,
//! so subscribers never see a half-applied change.

use std::fmt;
use std::sync::Arc;

use meshfs_protocol::PeerEndpoint;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Default number of snapshots buffered per subscriber
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Connection status shown by the control surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PeerStatus {
    #[default]
    NotStarted,
    /// `START_PEER` sent, no confirmation yet
    Starting,
    Running {
        port: u16,
    },
    Error {
        message: String,
    },
}

impl PeerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "Not Started"),
            Self::Starting => write!(f, "Starting..."),
            Self::Running { port } => write!(f, "Running on port {}", port),
            Self::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Snapshot of everything the control surface renders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub status: PeerStatus,
    pub peers: Vec<PeerEndpoint>,
}

struct Tracked {
    state: UiState,
    /// Bumped by every authoritative status change
    status_revision: u64,
}

struct StoreInner {
    tracked: Mutex<Tracked>,
    tx: broadcast::Sender<UiState>,
}

/// Shared, observable UI state
///
/// Cloning is cheap; all clones refer to the same state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    pub fn new(subscriber_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(subscriber_buffer.max(1));
        Self {
            inner: Arc::new(StoreInner {
                tracked: Mutex::new(Tracked {
                    state: UiState::default(),
                    status_revision: 0,
                }),
                tx,
            }),
        }
    }

    /// Current state
    pub fn snapshot(&self) -> UiState {
        self.inner.tracked.lock().state.clone()
    }

    pub fn status(&self) -> PeerStatus {
        self.inner.tracked.lock().state.status.clone()
    }

    pub fn peers(&self) -> Vec<PeerEndpoint> {
        self.inner.tracked.lock().state.peers.clone()
    }

    /// Receive a snapshot after every subsequent mutation
    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription {
            rx: self.inner.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Revision of the last authoritative status change
    pub(crate) fn status_revision(&self) -> u64 {
        self.inner.tracked.lock().status_revision
    }

    /// Apply an authoritative status reported by (or about) the backend
    pub(crate) fn set_status(&self, status: PeerStatus) {
        self.update(|tracked| {
            tracked.status_revision += 1;
            tracked.state.status = status;
        });
    }

    /// Optimistically move to `Starting` after a start request
    ///
    /// Skipped if any authoritative status arrived since `since_revision`,
    /// so a confirmation that raced ahead is never overwritten.
    pub(crate) fn mark_starting(&self, since_revision: u64) -> bool {
        let mut tracked = self.inner.tracked.lock();
        if tracked.status_revision != since_revision {
            tracing::debug!(
                since_revision,
                current = tracked.status_revision,
                "Backend status already updated, keeping it"
            );
            return false;
        }
        tracked.state.status = PeerStatus::Starting;
        let _ = self.inner.tx.send(tracked.state.clone());
        true
    }

    /// Replace the peer roster wholesale
    pub(crate) fn replace_peers(&self, peers: Vec<PeerEndpoint>) {
        self.update(|tracked| tracked.state.peers = peers);
    }

    fn update(&self, mutate: impl FnOnce(&mut Tracked)) {
        let mut tracked = self.inner.tracked.lock();
        mutate(&mut tracked);
        // No receivers is fine; the snapshot is still readable
        let _ = self.inner.tx.send(tracked.state.clone());
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.snapshot())
            .finish()
    }
}

/// Stream of state snapshots
///
/// A subscriber that falls more than the buffer size behind loses the oldest
/// snapshots and continues with the oldest one still buffered; the current
/// state is always available from [`StateStore::snapshot`].
pub struct StateSubscription {
    rx: broadcast::Receiver<UiState>,
}

impl StateSubscription {
    /// Wait for the next snapshot; `None` once the store is gone
    pub async fn recv(&mut self) -> Option<UiState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "State subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next snapshot if one is already queued
    pub fn try_recv(&mut self) -> Option<UiState> {
        loop {
            match self.rx.try_recv() {
                Ok(state) => return Some(state),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "State subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(host: &str, port: u16) -> PeerEndpoint {
        PeerEndpoint::new(host, port)
    }

    #[test]
    fn test_initial_state() {
        let store = StateStore::default();
        let state = store.snapshot();
        assert_eq!(state.status, PeerStatus::NotStarted);
        assert!(state.peers.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PeerStatus::NotStarted.to_string(), "Not Started");
        assert_eq!(PeerStatus::Starting.to_string(), "Starting...");
        assert_eq!(PeerStatus::Running { port: 65435 }.to_string(), "Running on port 65435");
        assert_eq!(
            PeerStatus::Error {
                message: "Peer not started.".into()
            }
            .to_string(),
            "Error: Peer not started."
        );
    }

    #[test]
    fn test_status_predicates() {
        assert!(PeerStatus::Running { port: 1 }.is_running());
        assert!(!PeerStatus::Starting.is_running());
        assert!(PeerStatus::Error { message: "x".into() }.is_error());
        assert!(!PeerStatus::NotStarted.is_error());
    }

    #[test]
    fn test_set_status_leaves_peers() {
        let store = StateStore::default();
        store.replace_peers(vec![peer("10.0.0.2", 5000)]);
        store.set_status(PeerStatus::Error {
            message: "boom".into(),
        });

        let state = store.snapshot();
        assert_eq!(state.peers, vec![peer("10.0.0.2", 5000)]);
        assert!(state.status.is_error());
    }

    #[test]
    fn test_replace_peers_leaves_status() {
        let store = StateStore::default();
        store.set_status(PeerStatus::Running { port: 7 });
        store.replace_peers(vec![peer("a", 1)]);
        store.replace_peers(vec![peer("b", 2), peer("c", 3)]);

        let state = store.snapshot();
        assert_eq!(state.status, PeerStatus::Running { port: 7 });
        assert_eq!(state.peers, vec![peer("b", 2), peer("c", 3)]);
    }

    #[test]
    fn test_subscriber_sees_every_mutation() {
        let store = StateStore::default();
        let mut sub = store.subscribe();

        store.set_status(PeerStatus::Running { port: 1 });
        store.replace_peers(vec![peer("a", 1)]);
        store.replace_peers(Vec::new());

        let first = sub.try_recv().unwrap();
        assert_eq!(first.status, PeerStatus::Running { port: 1 });
        assert!(first.peers.is_empty());

        let second = sub.try_recv().unwrap();
        assert_eq!(second.peers, vec![peer("a", 1)]);

        let third = sub.try_recv().unwrap();
        assert!(third.peers.is_empty());
        assert_eq!(third.status, PeerStatus::Running { port: 1 });

        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_mark_starting_applies_when_unchanged() {
        let store = StateStore::default();
        let revision = store.status_revision();
        assert!(store.mark_starting(revision));
        assert_eq!(store.status(), PeerStatus::Starting);
    }

    #[test]
    fn test_mark_starting_does_not_count_as_authoritative() {
        let store = StateStore::default();
        let revision = store.status_revision();
        store.mark_starting(revision);
        assert_eq!(store.status_revision(), revision);
    }

    #[test]
    fn test_mark_starting_never_overwrites_confirmation() {
        let store = StateStore::default();
        let revision = store.status_revision();

        // Confirmation raced ahead of the optimistic update
        store.set_status(PeerStatus::Running { port: 65435 });

        assert!(!store.mark_starting(revision));
        assert_eq!(store.status(), PeerStatus::Running { port: 65435 });
    }

    #[test]
    fn test_confirmation_overwrites_starting() {
        let store = StateStore::default();
        store.mark_starting(store.status_revision());
        store.set_status(PeerStatus::Running { port: 2 });
        assert_eq!(store.status(), PeerStatus::Running { port: 2 });
    }

    #[test]
    fn test_lagging_subscriber_keeps_newest() {
        let store = StateStore::new(2);
        let mut sub = store.subscribe();

        for port in 1..=5 {
            store.set_status(PeerStatus::Running { port });
        }

        assert_eq!(sub.try_recv().unwrap().status, PeerStatus::Running { port: 4 });
        assert_eq!(sub.try_recv().unwrap().status, PeerStatus::Running { port: 5 });
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let store = StateStore::default();
        let other = store.clone();
        other.set_status(PeerStatus::Starting);
        assert_eq!(store.status(), PeerStatus::Starting);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_recv_async() {
        let store = StateStore::default();
        let mut sub = store.subscribe();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.replace_peers(vec![PeerEndpoint::new("10.0.0.3", 5001)]);
        });

        let state = sub.recv().await.unwrap();
        assert_eq!(state.peers, vec![PeerEndpoint::new("10.0.0.3", 5001)]);
    }

    #[tokio::test]
    async fn test_subscription_closed_when_store_dropped() {
        let store = StateStore::default();
        let mut sub = store.subscribe();
        drop(store);
        assert!(sub.recv().await.is_none());
    }
}
