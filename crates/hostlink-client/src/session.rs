//! Connection state machine.
//!
//! Owns the session and sequences the join protocol: capabilities request,
//! join, transport negotiation, peer bookkeeping. The machine is pure
//! event-driven state — socket frames come in through [`SessionMachine::on_message`],
//! outbound messages leave through a [`Signaling`] implementation — so it is
//! testable without a socket. The socket runtime lives in [`crate::run_session`].

use std::time::Duration;

use hostlink_core::{
    ConnectionStatus, JoinSpace, LeaveSpace, RequestMessage, ResponseMessage, resolve_host_url,
    validate_response,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::device::MediaDevice;
use crate::engine::{AudioControl, AudioState};
use crate::error::{ConfigError, NegotiationError};
use crate::negotiator::{NegotiationState, TransportNegotiator};
use crate::reconnect::ReconnectPolicy;
use crate::store::SharedStore;

/// Outbound signaling channel. Sends are best-effort: a send on a non-open
/// socket is dropped, not queued or retried.
pub trait Signaling {
    fn send(&self, message: RequestMessage);
}

/// Session configuration, validated before a socket is opened.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host to dial; scheme resolved by [`resolve_host_url`].
    pub host: String,
    /// URI of the space to join.
    pub space: String,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, space: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            space: space.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.space.trim().is_empty() {
            return Err(ConfigError::MissingSpace);
        }
        Ok(())
    }
}

/// One client's connection to one host.
#[derive(Debug, Default)]
pub struct Session {
    pub status: ConnectionStatus,
    pub player_id: Option<u32>,
    pub reconnect_attempts: u32,
}

/// Drives one session through the join protocol.
pub struct SessionMachine<D> {
    config: SessionConfig,
    session: Session,
    negotiator: TransportNegotiator<D>,
    store: SharedStore,
    /// `join_success` received on the current connection.
    joined: bool,
}

impl<D: MediaDevice> SessionMachine<D> {
    pub fn new(config: SessionConfig, store: SharedStore, device: D) -> Self {
        Self {
            config,
            session: Session::default(),
            negotiator: TransportNegotiator::new(device),
            store,
            joined: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status
    }

    pub fn player_id(&self) -> Option<u32> {
        self.session.player_id
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.session.reconnect_attempts
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    pub fn negotiator(&mut self) -> &mut TransportNegotiator<D> {
        &mut self.negotiator
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Validate the configuration and resolve the URL to dial. Config
    /// problems surface here, before any socket exists.
    pub async fn connect(&mut self) -> Result<String, ConfigError> {
        self.config.validate()?;
        self.set_status(ConnectionStatus::Connecting).await;
        Ok(resolve_host_url(&self.config.host))
    }

    /// The socket opened: request router capabilities, then join. The
    /// capabilities request always precedes the join.
    pub async fn on_open<S: Signaling>(&mut self, signaling: &S, audio: &dyn AudioControl) {
        info!(host = %self.config.host, "connected to host");

        signaling.send(RequestMessage::WebrtcGetRouterRtpCapabilities);
        signaling.send(RequestMessage::Join(JoinSpace {
            space_id: self.config.space.clone(),
        }));
        self.set_status(ConnectionStatus::AwaitingCapabilities).await;

        if audio.state() == AudioState::Suspended {
            audio.resume();
        }
    }

    /// One inbound socket frame. A malformed message is logged and
    /// discarded; it never changes state. An `Err` means the negotiation is
    /// broken and the caller should tear the socket down.
    pub async fn on_message<S: Signaling>(
        &mut self,
        raw: Value,
        signaling: &S,
    ) -> Result<(), NegotiationError> {
        let message = match validate_response(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("discarding malformed message: {err}");
                return Ok(());
            }
        };

        match message {
            ResponseMessage::JoinSuccess(player_id) => {
                info!("joined space as player 0x{player_id:x}");
                self.joined = true;
                self.session.player_id = Some(player_id);
                self.session.reconnect_attempts = 0;
                self.store.write().await.set_player_id(Some(player_id));
                self.maybe_connected().await;
            }
            ResponseMessage::WebrtcRtpCapabilities(capabilities) => {
                if self.session.status == ConnectionStatus::AwaitingCapabilities {
                    self.set_status(ConnectionStatus::Negotiating).await;
                }
                self.negotiator
                    .on_router_capabilities(capabilities, signaling)
                    .await?;
                self.maybe_connected().await;
            }
            ResponseMessage::WebrtcTransportCreated(created) => {
                match self.negotiator.on_transport_created(created) {
                    Ok(()) => {}
                    Err(NegotiationError::TransportRejected(role)) => {
                        // Recoverable: the step is simply not retried here.
                        warn!(%role, "host rejected transport creation");
                    }
                    Err(err) => return Err(err),
                }
                self.maybe_connected().await;
            }
            ResponseMessage::WebrtcProduceSuccess(result) => {
                if result.success {
                    debug!(producer = ?result.id, "produce acknowledged");
                } else {
                    warn!("produce rejected by host");
                }
            }
            ResponseMessage::NewConsumer(consumer) => {
                self.negotiator.on_new_consumer(consumer)?;
            }
            ResponseMessage::PlayerJoined(player_id) => {
                let mut store = self.store.write().await;
                store.add_peer(player_id);
                let name = store.display_name(player_id);
                store.push_system_message(format!("{name} joined"));
            }
            ResponseMessage::PlayerLeft(player_id) => {
                let mut store = self.store.write().await;
                let name = store.display_name(player_id);
                store.push_system_message(format!("{name} left"));
                store.remove_peer(player_id);
            }
            ResponseMessage::PlayerName(field) => {
                self.store
                    .write()
                    .await
                    .set_peer_name(field.player_id, field.value);
            }
            ResponseMessage::PlayerAvatar(field) => {
                self.store
                    .write()
                    .await
                    .set_peer_avatar(field.player_id, field.value);
            }
            ResponseMessage::PlayerHandle(field) => {
                self.store
                    .write()
                    .await
                    .set_peer_handle(field.player_id, field.value);
            }
            ResponseMessage::PlayerLocation(location) => {
                self.store
                    .write()
                    .await
                    .set_peer_location(location.player_id, location.location);
            }
            ResponseMessage::PlayerFalling(falling) => {
                self.store
                    .write()
                    .await
                    .set_peer_falling(falling.player_id, falling.falling);
            }
            ResponseMessage::PlayerChat(chat) => {
                self.store
                    .write()
                    .await
                    .push_player_message(chat.player_id, chat.text, chat.timestamp);
            }
            ResponseMessage::LeaveSuccess(ack) => {
                debug!(success = ack.success, "leave acknowledged");
            }
        }

        Ok(())
    }

    /// The socket closed, expectedly or not. All per-connection state is
    /// discarded; returns the delay before the next attempt, or `None` when
    /// the policy gives up.
    pub async fn on_close(&mut self) -> Option<Duration> {
        self.joined = false;
        self.session.player_id = None;
        self.session.reconnect_attempts += 1;
        self.negotiator.reset();

        {
            let mut store = self.store.write().await;
            store.set_status(ConnectionStatus::Disconnected);
            store.clear_peers();
            store.set_player_id(None);
        }
        self.session.status = ConnectionStatus::Disconnected;

        self.config.reconnect.delay_for(self.session.reconnect_attempts)
    }

    /// Deliberate teardown: leave the space, clear everything, schedule
    /// nothing.
    pub async fn disconnect<S: Signaling>(&mut self, signaling: &S) {
        signaling.send(RequestMessage::Leave(LeaveSpace {
            space_id: self.config.space.clone(),
        }));

        self.joined = false;
        self.session = Session::default();
        self.negotiator.reset();
        self.store.write().await.reset();
        info!("session closed");
    }

    /// Connected requires both a successful join and ready transports.
    async fn maybe_connected(&mut self) {
        if self.joined
            && self.negotiator.state() == NegotiationState::Ready
            && self.session.status != ConnectionStatus::Connected
        {
            self.set_status(ConnectionStatus::Connected).await;
            info!("session fully connected");
        }
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        self.session.status = status;
        self.store.write().await.set_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use crate::testutil::{transport_created, FakeDevice, RecordingSignaling};
    use crate::NullAudio;
    use hostlink_core::TransportRole;
    use serde_json::json;

    fn machine() -> SessionMachine<FakeDevice> {
        let config = SessionConfig::new("localhost:4000", "wss://example.com/space/1");
        SessionMachine::new(config, SessionStore::new().into_shared(), FakeDevice::default())
    }

    fn raw(message: &ResponseMessage) -> Value {
        serde_json::to_value(message).unwrap()
    }

    async fn open(machine: &mut SessionMachine<FakeDevice>, signaling: &RecordingSignaling) {
        machine.connect().await.unwrap();
        machine.on_open(signaling, &NullAudio::default()).await;
    }

    async fn handshake(machine: &mut SessionMachine<FakeDevice>, signaling: &RecordingSignaling) {
        open(machine, signaling).await;
        machine
            .on_message(json!({ "type": "join_success", "data": 1 }), signaling)
            .await
            .unwrap();
        machine
            .on_message(
                json!({ "type": "webrtc_rtp_capabilities", "data": {} }),
                signaling,
            )
            .await
            .unwrap();
        machine
            .on_message(
                raw(&ResponseMessage::WebrtcTransportCreated(transport_created(
                    TransportRole::Producer,
                    true,
                ))),
                signaling,
            )
            .await
            .unwrap();
        machine
            .on_message(
                raw(&ResponseMessage::WebrtcTransportCreated(transport_created(
                    TransportRole::Consumer,
                    true,
                ))),
                signaling,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn capabilities_request_precedes_join() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;

        assert_eq!(
            signaling.types(),
            vec!["webrtc_get_router_rtp_capabilities", "join"],
        );
        assert_eq!(machine.status(), ConnectionStatus::AwaitingCapabilities);
    }

    #[tokio::test]
    async fn missing_config_is_rejected_before_dialing() {
        let mut machine = SessionMachine::new(
            SessionConfig::new("", "wss://example.com/space/1"),
            SessionStore::new().into_shared(),
            FakeDevice::default(),
        );
        assert_eq!(machine.connect().await.unwrap_err(), ConfigError::MissingHost);

        let mut machine = SessionMachine::new(
            SessionConfig::new("localhost:4000", ""),
            SessionStore::new().into_shared(),
            FakeDevice::default(),
        );
        assert_eq!(machine.connect().await.unwrap_err(), ConfigError::MissingSpace);
    }

    #[tokio::test]
    async fn join_success_alone_is_not_connected() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;

        machine
            .on_message(json!({ "type": "join_success", "data": 7 }), &signaling)
            .await
            .unwrap();

        assert_eq!(machine.player_id(), Some(7));
        assert_eq!(machine.status(), ConnectionStatus::AwaitingCapabilities);
    }

    #[tokio::test]
    async fn full_handshake_reaches_connected() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        handshake(&mut machine, &signaling).await;

        assert_eq!(machine.status(), ConnectionStatus::Connected);
        assert_eq!(machine.negotiation_state(), NegotiationState::Ready);
        assert_eq!(machine.store().read().await.player_id(), Some(1));
    }

    #[tokio::test]
    async fn malformed_message_changes_nothing() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;

        machine
            .on_message(json!({ "type": "join_success", "data": "seven" }), &signaling)
            .await
            .unwrap();
        machine
            .on_message(json!({ "type": "warp_drive" }), &signaling)
            .await
            .unwrap();

        assert_eq!(machine.status(), ConnectionStatus::AwaitingCapabilities);
        assert_eq!(machine.player_id(), None);
    }

    #[tokio::test]
    async fn close_during_negotiation_resets_everything() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;
        machine
            .on_message(json!({ "type": "join_success", "data": 1 }), &signaling)
            .await
            .unwrap();
        machine
            .on_message(
                json!({ "type": "webrtc_rtp_capabilities", "data": {} }),
                &signaling,
            )
            .await
            .unwrap();
        assert_eq!(machine.status(), ConnectionStatus::Negotiating);

        let delay = machine.on_close().await;
        assert_eq!(delay, Some(Duration::ZERO));
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        assert_eq!(machine.negotiation_state(), NegotiationState::Uninitialized);
        assert_eq!(machine.player_id(), None);
        assert_eq!(machine.reconnect_attempts(), 1);

        // Reconnection restarts the full sequence: device loads again.
        let signaling = RecordingSignaling::default();
        handshake(&mut machine, &signaling).await;
        assert_eq!(machine.status(), ConnectionStatus::Connected);
        assert_eq!(machine.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn join_success_resets_the_reconnect_counter() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;
        machine.on_close().await;
        machine.on_close().await;
        assert_eq!(machine.reconnect_attempts(), 2);

        open(&mut machine, &signaling).await;
        machine
            .on_message(json!({ "type": "join_success", "data": 1 }), &signaling)
            .await
            .unwrap();
        assert_eq!(machine.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn deliberate_disconnect_sends_leave_and_schedules_nothing() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        handshake(&mut machine, &signaling).await;
        machine.on_close().await;
        assert_eq!(machine.reconnect_attempts(), 1);

        machine.disconnect(&signaling).await;
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        assert_eq!(machine.reconnect_attempts(), 0);
        assert!(signaling.types().last().is_some_and(|t| t == "leave"));
    }

    #[tokio::test]
    async fn peer_roster_follows_join_and_leave() {
        let mut machine = machine();
        let signaling = RecordingSignaling::default();
        handshake(&mut machine, &signaling).await;

        machine
            .on_message(json!({ "type": "player_joined", "data": 2 }), &signaling)
            .await
            .unwrap();
        machine
            .on_message(
                json!({ "type": "player_name", "data": { "playerId": 2, "value": "Bob" } }),
                &signaling,
            )
            .await
            .unwrap();

        {
            let store = machine.store().read().await;
            let snapshot = store.snapshot();
            assert_eq!(snapshot.peers.len(), 1);
            assert_eq!(snapshot.peers[0].display_name, "Bob");
            assert_eq!(snapshot.chat.len(), 1);
        }

        machine
            .on_message(json!({ "type": "player_left", "data": 2 }), &signaling)
            .await
            .unwrap();
        let store = machine.store().read().await;
        let snapshot = store.snapshot();
        assert!(snapshot.peers.is_empty());
        // "Bob joined", "Bob left".
        assert_eq!(snapshot.chat.len(), 2);
        assert_eq!(snapshot.chat[1].text(), "Bob left");
    }

    #[tokio::test]
    async fn device_failure_escalates() {
        let mut machine = SessionMachine::new(
            SessionConfig::new("localhost:4000", "wss://example.com/space/1"),
            SessionStore::new().into_shared(),
            FakeDevice {
                fail_load: true,
                ..FakeDevice::default()
            },
        );
        let signaling = RecordingSignaling::default();
        open(&mut machine, &signaling).await;

        let err = machine
            .on_message(
                json!({ "type": "webrtc_rtp_capabilities", "data": {} }),
                &signaling,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Device(_)));
    }
}
