//! Wire types for the hostlink session protocol.
//!
//! This crate defines the JSON messages exchanged between a client and a
//! multiplayer host over a WebSocket, one message per frame, each carrying a
//! `type` tag and a `data` payload. Session logic lives in `hostlink-client`;
//! this crate provides the envelope and the schema validation that guards it.

mod host_url;
mod message;
mod rtp;
mod validate;

pub use host_url::resolve_host_url;
pub use message::{
    ConnectTransport, ConsumeAudio, JoinSpace, LeaveSpace, PlayerChat, PlayerFalling,
    PlayerLocation, PlayerProfileField, Produce, ProduceSuccess, RequestMessage, ResponseMessage,
    SuccessFlag, TransportCreated,
};
pub use rtp::{
    ConsumerType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, MediaKind, NewConsumer, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpDirection, RtpEncodingParameters, RtpParameters,
    RtpHeaderExtension, RtpHeaderExtensionParameters, RtxParameters, TransportParams,
    TransportRole,
};
pub use validate::{SchemaError, validate_request, validate_response};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No socket, no session.
    #[default]
    Disconnected,
    /// Socket dial in progress.
    Connecting,
    /// Socket open, waiting for the host's router capabilities.
    AwaitingCapabilities,
    /// Media transport negotiation in progress.
    Negotiating,
    /// Joined and media transports ready.
    Connected,
}
