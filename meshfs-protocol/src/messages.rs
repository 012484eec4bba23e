//! Bridge-backend message types

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ==================== Envelope ====================

/// Untyped wire message: a `type` tag plus a free-form `payload`
///
/// Every line on the wire decodes to an envelope first. Typed events are
/// produced from it, and event types this crate does not know about are kept
/// as the raw envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }
}

// ==================== Commands ====================

/// Payload of a `START_PEER` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPeer {
    /// Port the backend should listen and discover on
    pub port: u16,
    /// Bootstrap server host; the backend picks its own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_host: Option<String>,
    /// Bootstrap server port; the backend picks its own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_port: Option<u16>,
}

impl StartPeer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bootstrap_host: None,
            bootstrap_port: None,
        }
    }

    /// Set the bootstrap server address (builder pattern)
    pub fn with_bootstrap(mut self, host: impl Into<String>, port: u16) -> Self {
        self.bootstrap_host = Some(host.into());
        self.bootstrap_port = Some(port);
        self
    }
}

/// Messages sent from the bridge to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Begin listening/discovering on the given port
    StartPeer(StartPeer),

    /// Request an up-to-date peer roster
    GetPeers {},
}

impl Command {
    pub const START_PEER: &'static str = "START_PEER";
    pub const GET_PEERS: &'static str = "GET_PEERS";

    pub fn start_peer(port: u16) -> Self {
        Self::StartPeer(StartPeer::new(port))
    }

    pub fn get_peers() -> Self {
        Self::GetPeers {}
    }

    /// Wire `type` tag of this command
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::StartPeer(_) => Self::START_PEER,
            Self::GetPeers {} => Self::GET_PEERS,
        }
    }
}

// ==================== Peers ====================

/// A discovered mesh peer, `[host, port]` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerEndpoint {
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single roster entry
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

impl From<(String, u16)> for PeerEndpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerEndpoint> for (String, u16) {
    fn from(peer: PeerEndpoint) -> Self {
        (peer.host, peer.port)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A roster entry that could not be parsed as a peer
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedPeer {
    /// Position of the entry in the received list
    pub index: usize,
    pub raw: Value,
    pub reason: String,
}

/// Parsed `PEER_LIST` payload
///
/// Malformed entries do not invalidate the list. They are collected in
/// `rejected` and the remaining peers keep their original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerList {
    pub peers: Vec<PeerEndpoint>,
    pub rejected: Vec<RejectedPeer>,
}

impl PeerList {
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let mut list = Self::default();
        for (index, raw) in entries.into_iter().enumerate() {
            match PeerEndpoint::from_value(&raw) {
                Ok(peer) => list.peers.push(peer),
                Err(e) => list.rejected.push(RejectedPeer {
                    index,
                    raw,
                    reason: e.to_string(),
                }),
            }
        }
        list
    }
}

// ==================== Events ====================

/// Payload of a known event type did not match its schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {event_type} payload: {reason}")]
pub struct PayloadError {
    pub event_type: String,
    pub reason: String,
}

/// Messages received from the backend
///
/// Decoding is forward compatible: an unrecognized `type` becomes
/// [`Event::Unknown`] instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Event {
    /// Backend is listening on `port`
    PeerStarted { port: u16 },

    /// Full replacement of the peer roster
    PeerList(PeerList),

    /// Backend-reported application error
    Error { message: String },

    /// Event type this bridge does not understand
    Unknown(Envelope),
}

#[derive(Deserialize)]
struct PeerStartedPayload {
    port: u16,
}

#[derive(Deserialize)]
struct PeerListPayload {
    peers: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

impl Event {
    pub const PEER_STARTED: &'static str = "PEER_STARTED";
    pub const PEER_LIST: &'static str = "PEER_LIST";
    pub const ERROR: &'static str = "ERROR";

    /// Wire `type` tag of this event
    pub fn event_type(&self) -> &str {
        match self {
            Self::PeerStarted { .. } => Self::PEER_STARTED,
            Self::PeerList(_) => Self::PEER_LIST,
            Self::Error { .. } => Self::ERROR,
            Self::Unknown(envelope) => &envelope.msg_type,
        }
    }

    /// Whether this event changes the status (as opposed to the roster)
    pub fn is_status_event(&self) -> bool {
        matches!(self, Self::PeerStarted { .. } | Self::Error { .. })
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: Value,
) -> Result<T, PayloadError> {
    serde_json::from_value(payload).map_err(|e| PayloadError {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<Envelope> for Event {
    type Error = PayloadError;

    fn try_from(envelope: Envelope) -> Result<Event, PayloadError> {
        match envelope.msg_type.as_str() {
            Event::PEER_STARTED => {
                let p: PeerStartedPayload = payload(Event::PEER_STARTED, envelope.payload)?;
                Ok(Event::PeerStarted { port: p.port })
            }
            Event::PEER_LIST => {
                let p: PeerListPayload = payload(Event::PEER_LIST, envelope.payload)?;
                Ok(Event::PeerList(PeerList::from_entries(p.peers)))
            }
            Event::ERROR => {
                let p: ErrorPayload = payload(Event::ERROR, envelope.payload)?;
                Ok(Event::Error { message: p.message })
            }
            _ => Ok(Event::Unknown(envelope)),
        }
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        match event {
            Event::PeerStarted { port } => Envelope::new(Event::PEER_STARTED, json!({ "port": port })),
            Event::PeerList(list) => Envelope::new(Event::PEER_LIST, json!({ "peers": list.peers })),
            Event::Error { message } => Envelope::new(Event::ERROR, json!({ "message": message })),
            Event::Unknown(envelope) => envelope,
        }
    }
}
