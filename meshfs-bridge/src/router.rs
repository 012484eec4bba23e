//! Inbound event routing
//!
//! Applies each decoded backend event to the [`StateStore`] and then hands it
//! to every registered [`EventHandler`], strictly in stream order.

use meshfs_protocol::{decode_line, DecodeError, Event, PeerList};
use tokio::sync::mpsc;

use crate::state::{PeerStatus, StateStore};
use crate::supervisor::{ExitReport, Inbound};

/// Observer of decoded backend events
///
/// Handlers run on the router task after the state update for the event has
/// been applied. They must not block.
pub trait EventHandler: Send {
    /// Called for every decoded event, including unknown types
    fn handle(&mut self, event: &Event);

    /// Called once when the backend process has exited
    fn on_exit(&mut self, _report: &ExitReport) {}
}

/// Event handler backed by a closure
pub struct CallbackHandler<F>
where
    F: FnMut(&Event) + Send,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: FnMut(&Event) + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventHandler for CallbackHandler<F>
where
    F: FnMut(&Event) + Send,
{
    fn handle(&mut self, event: &Event) {
        (self.callback)(event)
    }
}

/// Dispatches inbound items to the state store and handlers
pub struct EventRouter {
    store: StateStore,
    handlers: Vec<Box<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            handlers: Vec::new(),
        }
    }

    /// Register a handler
    pub fn register(&mut self, handler: impl EventHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Register a handler (builder pattern)
    pub fn with_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.register(handler);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Decode and dispatch one raw line
    ///
    /// Blank lines and lines that fail to decode change nothing.
    pub fn on_line(&mut self, line: &str) {
        match decode_line::<Event>(line) {
            Ok(Some(event)) => self.on_event(event),
            Ok(None) => {}
            Err(e) => self.on_malformed(&e),
        }
    }

    /// Dispatch one item from the supervisor
    pub fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Event(event) => self.on_event(event),
            Inbound::Malformed(e) => self.on_malformed(&e),
            Inbound::Exited(report) => self.on_exit(report),
        }
    }

    /// Consume items until the supervisor drops its end
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            self.dispatch(inbound);
        }
        tracing::debug!("Event router stopped");
    }

    fn on_event(&mut self, event: Event) {
        tracing::debug!(event_type = event.event_type(), "Backend event");
        apply_event(&self.store, &event);

        for handler in &mut self.handlers {
            handler.handle(&event);
        }
    }

    fn on_malformed(&self, error: &DecodeError) {
        tracing::warn!(line = error.raw_line(), error = %error, "Skipping undecodable backend output");
    }

    fn on_exit(&mut self, report: ExitReport) {
        if report.requested {
            self.store.set_status(PeerStatus::NotStarted);
        } else {
            self.store.set_status(PeerStatus::Error {
                message: format!("backend exited unexpectedly ({})", report.describe()),
            });
        }

        for handler in &mut self.handlers {
            handler.on_exit(&report);
        }
    }
}

fn apply_event(store: &StateStore, event: &Event) {
    match event {
        Event::PeerStarted { port } => store.set_status(PeerStatus::Running { port: *port }),
        Event::PeerList(list) => apply_peer_list(store, list),
        Event::Error { message } => {
            tracing::warn!(message = %message, "Backend reported an error");
            store.set_status(PeerStatus::Error {
                message: message.clone(),
            });
        }
        Event::Unknown(envelope) => {
            tracing::info!(event_type = %envelope.msg_type, "Ignoring unknown backend event");
        }
    }
}

fn apply_peer_list(store: &StateStore, list: &PeerList) {
    for rejected in &list.rejected {
        tracing::warn!(
            index = rejected.index,
            entry = %rejected.raw,
            reason = %rejected.reason,
            "Dropping malformed peer entry"
        );
    }
    store.replace_peers(list.peers.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfs_protocol::PeerEndpoint;
    use std::sync::{Arc, Mutex};

    fn router() -> EventRouter {
        EventRouter::new(StateStore::default())
    }

    fn recorder() -> (CallbackHandler<impl FnMut(&Event) + Send>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = CallbackHandler::new(move |event: &Event| {
            sink.lock().unwrap().push(event.event_type().to_string());
        });
        (handler, seen)
    }

    #[test]
    fn test_peer_started_sets_running() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_STARTED","payload":{"port":65435}}"#);
        assert_eq!(router.store().status(), PeerStatus::Running { port: 65435 });
    }

    #[test]
    fn test_peer_list_replaces_roster_in_order() {
        let mut router = router();
        router.on_line(
            r#"{"type":"PEER_LIST","payload":{"peers":[["10.0.0.2",5000],["10.0.0.3",5001]]}}"#,
        );
        assert_eq!(
            router.store().peers(),
            vec![
                PeerEndpoint::new("10.0.0.2", 5000),
                PeerEndpoint::new("10.0.0.3", 5001)
            ]
        );
    }

    #[test]
    fn test_peer_list_drops_malformed_entries() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[["bad"],["10.0.0.3",5001]]}}"#);
        assert_eq!(router.store().peers(), vec![PeerEndpoint::new("10.0.0.3", 5001)]);
    }

    #[test]
    fn test_consecutive_peer_lists_replace() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[["10.0.0.2",5000]]}}"#);
        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[["10.0.0.9",6000]]}}"#);
        assert_eq!(router.store().peers(), vec![PeerEndpoint::new("10.0.0.9", 6000)]);

        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[]}}"#);
        assert!(router.store().peers().is_empty());
    }

    #[test]
    fn test_peer_list_leaves_status() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_STARTED","payload":{"port":1}}"#);
        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[["h",2]]}}"#);
        assert_eq!(router.store().status(), PeerStatus::Running { port: 1 });
    }

    #[test]
    fn test_error_sets_status_and_keeps_peers() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_LIST","payload":{"peers":[["h",2]]}}"#);
        router.on_line(r#"{"type":"ERROR","payload":{"message":"Peer already running."}}"#);

        let state = router.store().snapshot();
        assert_eq!(
            state.status,
            PeerStatus::Error {
                message: "Peer already running.".into()
            }
        );
        assert_eq!(state.peers, vec![PeerEndpoint::new("h", 2)]);
    }

    #[test]
    fn test_invalid_json_changes_nothing() {
        let store = StateStore::default();
        let mut sub = store.subscribe();
        let mut router = EventRouter::new(store.clone());

        router.on_line("{not json");
        router.on_line("   ");
        router.on_line("");

        assert_eq!(store.snapshot(), Default::default());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_bad_payload_for_known_type_changes_nothing() {
        let mut router = router();
        router.on_line(r#"{"type":"PEER_STARTED","payload":{"port":"high"}}"#);
        router.on_line(r#"{"type":"PEER_LIST","payload":{}}"#);
        assert_eq!(router.store().snapshot(), Default::default());
    }

    #[test]
    fn test_unknown_type_reaches_handlers_only() {
        let (handler, seen) = recorder();
        let mut router = router().with_handler(handler);

        router.on_line(r#"{"type":"FILE_SYNCED","payload":{"path":"a.txt"}}"#);

        assert_eq!(router.store().snapshot(), Default::default());
        assert_eq!(*seen.lock().unwrap(), vec!["FILE_SYNCED".to_string()]);
    }

    #[test]
    fn test_handlers_see_events_in_order_after_state() {
        let store = StateStore::default();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let reader = store.clone();

        let mut router = EventRouter::new(store).with_handler(CallbackHandler::new(move |_: &Event| {
            sink.lock().unwrap().push(reader.status());
        }));

        router.dispatch(Inbound::Event(Event::PeerStarted { port: 10 }));
        router.dispatch(Inbound::Event(Event::Error {
            message: "x".into(),
        }));

        assert_eq!(
            *observed.lock().unwrap(),
            vec![
                PeerStatus::Running { port: 10 },
                PeerStatus::Error { message: "x".into() }
            ]
        );
    }

    #[test]
    fn test_unexpected_exit_sets_error() {
        let mut router = router();
        router.dispatch(Inbound::Event(Event::PeerStarted { port: 65435 }));
        router.dispatch(Inbound::Exited(ExitReport {
            status: None,
            requested: false,
        }));

        assert_eq!(
            router.store().status(),
            PeerStatus::Error {
                message: "backend exited unexpectedly (status unknown)".into()
            }
        );
    }

    #[test]
    fn test_requested_exit_resets_status() {
        let mut router = router();
        router.dispatch(Inbound::Event(Event::PeerStarted { port: 65435 }));
        router.dispatch(Inbound::Event(Event::PeerList(PeerList::from_entries(vec![
            serde_json::json!(["10.0.0.2", 5000]),
        ]))));
        router.dispatch(Inbound::Exited(ExitReport {
            status: None,
            requested: true,
        }));

        let state = router.store().snapshot();
        assert_eq!(state.status, PeerStatus::NotStarted);
        assert_eq!(state.peers.len(), 1);
    }

    #[test]
    fn test_exit_notifies_handlers() {
        struct ExitCounter(Arc<Mutex<usize>>);

        impl EventHandler for ExitCounter {
            fn handle(&mut self, _event: &Event) {}

            fn on_exit(&mut self, _report: &ExitReport) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let exits = Arc::new(Mutex::new(0));
        let mut router = router();
        router.register(ExitCounter(exits.clone()));
        router.dispatch(Inbound::Exited(ExitReport {
            status: None,
            requested: true,
        }));

        assert_eq!(*exits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_until_closed() {
        let store = StateStore::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(EventRouter::new(store.clone()).run(rx));

        tx.send(Inbound::Event(Event::PeerStarted { port: 7 })).await.unwrap();
        tx.send(Inbound::Event(Event::Error {
            message: "Peer already running.".into(),
        }))
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            store.status(),
            PeerStatus::Error {
                message: "Peer already running.".into()
            }
        );
    }
}
