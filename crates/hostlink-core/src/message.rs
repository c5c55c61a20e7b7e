//! Protocol messages.
//!
//! Both unions are adjacently tagged so a message serializes to the
//! `{ "type": "...", "data": ... }` envelope the host speaks. Payload fields
//! are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rtp::{
    DtlsParameters, MediaKind, NewConsumer, RtpCapabilities, RtpParameters, TransportParams,
    TransportRole,
};

/// Messages sent from client to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RequestMessage {
    /// Join a space by URI.
    Join(JoinSpace),
    /// Leave a previously joined space.
    Leave(LeaveSpace),
    /// Ask the host for its router's RTP capabilities.
    WebrtcGetRouterRtpCapabilities,
    /// Request creation of a media transport for one role.
    WebrtcCreateTransport(TransportRole),
    /// Hand the host the DTLS parameters for a created transport.
    WebrtcConnectTransport(ConnectTransport),
    /// Announce an outbound media track on the producer transport.
    WebrtcProduce(Produce),
    /// Tell the host which capabilities the local device ended up with.
    SetRtpCapabilities(RtpCapabilities),
    /// Ask the host to start consuming audio for us.
    WebrtcConsumeAudio(ConsumeAudio),
    /// Engine-defined physics payload, forwarded verbatim.
    SetGrounded(Value),
    /// Chat line from the local player.
    Chat(String),
}

/// Messages sent from host to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponseMessage {
    /// Join accepted; payload is the assigned player identifier.
    JoinSuccess(u32),
    /// Leave acknowledged.
    LeaveSuccess(SuccessFlag),
    /// The router's RTP capabilities.
    WebrtcRtpCapabilities(RtpCapabilities),
    /// Outcome of a `webrtc_create_transport` request, correlated by role.
    WebrtcTransportCreated(TransportCreated),
    /// Outcome of a `webrtc_produce` request.
    WebrtcProduceSuccess(ProduceSuccess),
    /// A new inbound media consumer is available.
    NewConsumer(NewConsumer),
    /// A remote player entered the space.
    PlayerJoined(u32),
    /// A remote player left the space.
    PlayerLeft(u32),
    /// A remote player's display name changed.
    PlayerName(PlayerProfileField),
    /// A remote player's avatar URI changed.
    PlayerAvatar(PlayerProfileField),
    /// A remote player's external identity handle changed.
    PlayerHandle(PlayerProfileField),
    /// A remote player's spatial transform.
    PlayerLocation(PlayerLocation),
    /// A remote player started or stopped falling.
    PlayerFalling(PlayerFalling),
    /// Chat line from a remote player.
    PlayerChat(PlayerChat),
}

/// `join` / `leave` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpace {
    pub space_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveSpace {
    pub space_id: String,
}

/// Bare `success` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessFlag {
    pub success: bool,
}

/// `webrtc_connect_transport` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub role: TransportRole,
    pub dtls_parameters: DtlsParameters,
}

/// `webrtc_produce` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// `webrtc_consume_audio` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeAudio {
    pub rtp_capabilities: RtpCapabilities,
}

/// `webrtc_transport_created` payload.
///
/// `success: false` is a recoverable negotiation failure: `params` is absent
/// and the requesting side decides whether to retry the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    pub success: bool,
    pub role: TransportRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<TransportParams>,
}

/// `webrtc_produce_success` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceSuccess {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// `player_name` / `player_avatar` / `player_handle` payload. A missing
/// value clears the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfileField {
    pub player_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// `player_location` payload: position, rotation quaternion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLocation {
    pub player_id: u32,
    pub location: [f32; 7],
}

/// `player_falling` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerFalling {
    pub player_id: u32,
    pub falling: bool,
}

/// `player_chat` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerChat {
    pub player_id: u32,
    pub text: String,
    /// Milliseconds since the Unix epoch, stamped by the host.
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope() {
        let msg = RequestMessage::Join(JoinSpace {
            space_id: "wss://example.com/space/1".to_string(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["data"]["spaceId"], "wss://example.com/space/1");
    }

    #[test]
    fn unit_payload_accepts_null_data() {
        let msg: RequestMessage = serde_json::from_str(
            r#"{"type":"webrtc_get_router_rtp_capabilities","data":null}"#,
        )
        .unwrap();
        assert!(matches!(msg, RequestMessage::WebrtcGetRouterRtpCapabilities));
    }

    #[test]
    fn transport_role_is_a_bare_string() {
        let msg = RequestMessage::WebrtcCreateTransport(TransportRole::Producer);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "webrtc_create_transport");
        assert_eq!(json["data"], "producer");
    }

    #[test]
    fn response_roundtrip() {
        let msg = ResponseMessage::PlayerChat(PlayerChat {
            player_id: 7,
            text: "hello".to_string(),
            timestamp: 1_700_000_000_000,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ResponseMessage = serde_json::from_str(&json).unwrap();
        match back {
            ResponseMessage::PlayerChat(chat) => {
                assert_eq!(chat.player_id, 7);
                assert_eq!(chat.text, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
