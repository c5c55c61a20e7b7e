//! Client session layer for the hostlink protocol.
//!
//! A session is one client's connection to one multiplayer host. The
//! [`SessionMachine`] owns the connection state and sequences the join
//! protocol; the [`TransportNegotiator`] handles WebRTC media transport
//! setup behind a [`MediaDevice`]; the [`SessionStore`] holds what the
//! client currently knows about itself and its peers, readable by UI
//! collaborators through snapshots; [`run_session`] wires it all to a real
//! WebSocket and applies the [`ReconnectPolicy`].

mod connect;
mod device;
mod engine;
mod error;
mod negotiator;
mod reconnect;
mod session;
mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use connect::{SessionHandle, run_session};
pub use device::{DeviceError, MediaDevice, NullDevice};
pub use engine::{AudioControl, AudioState, EngineHandle, NullAudio};
pub use error::{ConfigError, NegotiationError, TransportError};
pub use negotiator::{NegotiationState, TransportNegotiator};
pub use reconnect::ReconnectPolicy;
pub use session::{Session, SessionConfig, SessionMachine, Signaling};
pub use store::{
    CHAT_LOG_CAPACITY, ChatMessage, PeerSnapshot, SessionStore, SharedStore, StoreSnapshot,
};
