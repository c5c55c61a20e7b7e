//! Host server implementation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use hostlink_core::{
    DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, IceProtocol, MediaKind,
    PlayerChat, PlayerFalling, ProduceSuccess, RequestMessage, ResponseMessage, RtpCapabilities,
    RtpCodecCapability, SuccessFlag, TransportCreated, TransportParams, TransportRole,
    validate_request,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

/// Shared host state.
struct HostState {
    next_player_id: u32,
    next_transport_id: u64,
    players: HashMap<u32, SocketAddr>,
}

impl HostState {
    fn new() -> Self {
        Self {
            next_player_id: 0,
            next_transport_id: 0,
            players: HashMap::new(),
        }
    }

    fn assign_player(&mut self, addr: SocketAddr) -> u32 {
        let id = self.next_player_id;
        self.next_player_id += 1;
        self.players.insert(id, addr);
        id
    }

    fn transport_params(&mut self, role: TransportRole) -> TransportParams {
        let id = self.next_transport_id;
        self.next_transport_id += 1;
        TransportParams {
            id: format!("{role}-{id}"),
            ice_parameters: IceParameters {
                username_fragment: format!("ufrag{id}"),
                password: format!("pass{id}"),
                ice_lite: Some(true),
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                ip: "127.0.0.1".to_string(),
                port: 40_000,
                priority: 1_076_302_079,
                protocol: IceProtocol::Udp,
                candidate_type: "host".to_string(),
                tcp_type: None,
            }],
            dtls_parameters: DtlsParameters {
                role: None,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: "F0:0D:CA:FE".to_string(),
                }],
            },
        }
    }
}

type SharedState = Arc<RwLock<HostState>>;

/// Broadcast payload: serialized response plus the originating player, so a
/// connection can skip its own announcements. `None` reaches everyone.
type Broadcast = (Option<u32>, String);

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(RwLock::new(HostState::new()));
    let (broadcast_tx, _) = broadcast::channel::<Broadcast>(100);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, state, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    broadcast_tx: broadcast::Sender<Broadcast>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let mut broadcast_rx = broadcast_tx.subscribe();

    tracing::debug!("New connection from {}", addr);

    let mut player_id: Option<u32> = None;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                let Message::Text(text) = msg else { continue };
                let raw = match serde_json::from_str(&text) {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!("Unparseable frame: {}", e);
                        continue;
                    }
                };
                let request = match validate_request(raw) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!("Invalid message: {}", e);
                        continue;
                    }
                };

                handle_request(
                    request,
                    addr,
                    &state,
                    &mut player_id,
                    &mut sink,
                    &broadcast_tx,
                ).await?;
            }

            msg = broadcast_rx.recv() => {
                if let Ok((origin, text)) = msg {
                    // Don't echo a player's own announcements back at them.
                    if origin.is_none() || origin != player_id {
                        sink.send(Message::Text(text.into())).await?;
                    }
                }
            }
        }
    }

    // Remove player on disconnect.
    if let Some(id) = player_id {
        let mut s = state.write().await;
        s.players.remove(&id);
        broadcast(&broadcast_tx, id, &ResponseMessage::PlayerLeft(id));
        tracing::info!("Player {:#x} disconnected", id);
    }

    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

async fn handle_request(
    request: RequestMessage,
    addr: SocketAddr,
    state: &SharedState,
    player_id: &mut Option<u32>,
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<TcpStream>,
        Message,
    >,
    broadcast_tx: &broadcast::Sender<Broadcast>,
) -> anyhow::Result<()> {
    match request {
        RequestMessage::WebrtcGetRouterRtpCapabilities => {
            send(sink, &ResponseMessage::WebrtcRtpCapabilities(router_capabilities())).await?;
        }

        RequestMessage::Join(join) => {
            let id = state.write().await.assign_player(addr);
            *player_id = Some(id);
            tracing::info!("Player {:#x} joined {}", id, join.space_id);

            send(sink, &ResponseMessage::JoinSuccess(id)).await?;
            broadcast(broadcast_tx, id, &ResponseMessage::PlayerJoined(id));
        }

        RequestMessage::Leave(leave) => {
            send(sink, &ResponseMessage::LeaveSuccess(SuccessFlag { success: true })).await?;
            if let Some(id) = player_id.take() {
                state.write().await.players.remove(&id);
                broadcast(broadcast_tx, id, &ResponseMessage::PlayerLeft(id));
                tracing::info!("Player {:#x} left {}", id, leave.space_id);
            }
        }

        RequestMessage::WebrtcCreateTransport(role) => {
            let params = state.write().await.transport_params(role);
            send(
                sink,
                &ResponseMessage::WebrtcTransportCreated(TransportCreated {
                    success: true,
                    role,
                    params: Some(params),
                }),
            )
            .await?;
        }

        RequestMessage::SetRtpCapabilities(caps) => {
            tracing::debug!("Client advertises {} codecs", caps.codecs.len());
        }

        RequestMessage::WebrtcConnectTransport(connect) => {
            tracing::debug!("Transport {} connecting", connect.role);
        }

        RequestMessage::WebrtcProduce(produce) => {
            tracing::debug!("Producer announced: {:?}", produce.kind);
            send(
                sink,
                &ResponseMessage::WebrtcProduceSuccess(ProduceSuccess {
                    success: true,
                    id: Some("producer-0".to_string()),
                }),
            )
            .await?;
        }

        RequestMessage::WebrtcConsumeAudio(_) => {
            tracing::debug!("Audio consume requested");
        }

        RequestMessage::SetGrounded(data) => {
            // Engine-defined payload; surface a falling flag when present.
            if let (Some(id), Some(grounded)) =
                (*player_id, data.get("grounded").and_then(|v| v.as_bool()))
            {
                broadcast(
                    broadcast_tx,
                    id,
                    &ResponseMessage::PlayerFalling(PlayerFalling {
                        player_id: id,
                        falling: !grounded,
                    }),
                );
            }
        }

        RequestMessage::Chat(text) => {
            if let Some(id) = *player_id {
                broadcast_all(
                    broadcast_tx,
                    &ResponseMessage::PlayerChat(PlayerChat {
                        player_id: id,
                        text,
                        timestamp: now_millis(),
                    }),
                );
            }
        }
    }

    Ok(())
}

async fn send(
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<TcpStream>,
        Message,
    >,
    message: &ResponseMessage,
) -> anyhow::Result<()> {
    sink.send(Message::Text(serde_json::to_string(message)?.into()))
        .await?;
    Ok(())
}

fn broadcast(tx: &broadcast::Sender<Broadcast>, origin: u32, message: &ResponseMessage) {
    if let Ok(text) = serde_json::to_string(message) {
        let _ = tx.send((Some(origin), text));
    }
}

/// Broadcast that also reaches the originating player (chat echoes back).
fn broadcast_all(tx: &broadcast::Sender<Broadcast>, message: &ResponseMessage) {
    if let Ok(text) = serde_json::to_string(message) {
        let _ = tx.send((None, text));
    }
}

fn router_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                clock_rate: 48_000,
                preferred_payload_type: Some(100),
                channels: Some(2),
                parameters: None,
                rtcp_feedback: None,
            },
            RtpCodecCapability {
                kind: MediaKind::Video,
                mime_type: "video/VP8".to_string(),
                clock_rate: 90_000,
                preferred_payload_type: Some(101),
                channels: None,
                parameters: None,
                rtcp_feedback: None,
            },
        ],
        header_extensions: Vec::new(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
