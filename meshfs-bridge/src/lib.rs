//! meshfs-bridge: IPC bridge between a control surface and the MeshFS backend
//!
//! The backend runs as a supervised subprocess speaking newline-delimited
//! JSON on its standard streams. Commands flow from the control surface
//! through a [`CommandChannel`] into the backend's stdin; events read from
//! its stdout pass through the [`EventRouter`] into the [`StateStore`],
//! which notifies subscribers of every change.
//!
//! [`Bridge`] wires these together.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod router;
pub mod state;
pub mod supervisor;

pub use bridge::Bridge;
pub use channel::CommandChannel;
pub use config::{BackendConfig, BridgeConfig, PanelConfig, PeerConfig};
pub use router::{CallbackHandler, EventHandler, EventRouter};
pub use state::{PeerStatus, StateStore, StateSubscription, UiState};
pub use supervisor::{ExitReport, Inbound, LaunchSpec, ProcessState, Supervisor, SupervisorOptions};
