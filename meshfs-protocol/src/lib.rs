//! meshfs-protocol: Wire definitions for the MeshFS backend bridge
//!
//! The backend process speaks newline-delimited JSON over its standard
//! streams. Every message is an object with a `type` string and a `payload`
//! object. This crate defines the typed commands and events carried by that
//! protocol and the codec that frames them.

pub mod codec;
pub mod messages;

// Re-export main types at crate root
pub use codec::{
    decode_line, encode_line, BackendCodec, BridgeCodec, CodecError, DecodeError, JsonLinesCodec,
    MAX_LINE_LENGTH,
};
pub use messages::{
    Command, Envelope, Event, PayloadError, PeerEndpoint, PeerList, RejectedPeer, StartPeer,
};

/// Port the control panel asks the backend to listen on by default
pub const DEFAULT_PEER_PORT: u16 = 65435;
