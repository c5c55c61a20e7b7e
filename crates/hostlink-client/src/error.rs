//! Session error taxonomy.
//!
//! None of these are fatal to the process. Schema failures are handled where
//! messages arrive (logged and discarded); negotiation failures feed the
//! reconnect path; config failures surface to the caller before a socket is
//! opened.

use hostlink_core::TransportRole;

use crate::device::DeviceError;

/// Invalid session configuration, detected at connect time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no host configured")]
    MissingHost,
    #[error("no space configured")]
    MissingSpace,
}

/// Media device or transport negotiation failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NegotiationError {
    /// The local media stack refused a load or consume.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// A second transport request was issued for a role that already has one
    /// outstanding.
    #[error("a {0} transport request is already outstanding")]
    RequestPending(TransportRole),
    /// The host answered a transport request with `success: false`. This is
    /// recoverable; the caller decides whether to retry the step.
    #[error("host failed to create the {0} transport")]
    TransportRejected(TransportRole),
    /// An operation was attempted before the transports were ready.
    #[error("{0} requires ready transports")]
    NotReady(&'static str),
}

/// Socket-level failure. Sends on a non-open socket are silently dropped;
/// these only describe dial failures and abnormal closure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket dial failed: {0}")]
    Connect(tokio_tungstenite::tungstenite::Error),
    #[error("websocket closed: {0}")]
    Socket(tokio_tungstenite::tungstenite::Error),
}
