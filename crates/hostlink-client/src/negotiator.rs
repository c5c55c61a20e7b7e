//! WebRTC transport negotiation.
//!
//! One negotiator per session. Capability load is single-shot: a repeat
//! router-capabilities message while the device is loaded is a no-op.
//! Transport creation is correlated by role, not request id, so at most one
//! request per role may be outstanding at a time.

use hostlink_core::{
    DtlsParameters, MediaKind, NewConsumer, RequestMessage, RtpCapabilities, RtpParameters,
    TransportCreated, TransportParams, TransportRole,
};
use tracing::{debug, warn};

use crate::device::MediaDevice;
use crate::error::NegotiationError;
use crate::session::Signaling;

/// Negotiation progress for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Uninitialized,
    DeviceLoaded,
    TransportsPending,
    Ready,
}

#[derive(Debug, Default)]
struct RoleSlot {
    outstanding: bool,
    params: Option<TransportParams>,
}

pub struct TransportNegotiator<D> {
    device: D,
    state: NegotiationState,
    producer: RoleSlot,
    consumer: RoleSlot,
}

impl<D: MediaDevice> TransportNegotiator<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: NegotiationState::default(),
            producer: RoleSlot::default(),
            consumer: RoleSlot::default(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Router capabilities arrived. Loads the device, then requests both
    /// transports and reports the device's own capabilities.
    pub async fn on_router_capabilities<S: Signaling>(
        &mut self,
        capabilities: RtpCapabilities,
        signaling: &S,
    ) -> Result<(), NegotiationError> {
        if self.device.loaded() {
            debug!("device already loaded, ignoring repeat router capabilities");
            return Ok(());
        }

        self.device.load(capabilities).await?;
        self.state = NegotiationState::DeviceLoaded;

        self.request_transport(TransportRole::Producer, signaling)?;
        self.request_transport(TransportRole::Consumer, signaling)?;
        signaling.send(RequestMessage::SetRtpCapabilities(
            self.device.rtp_capabilities(),
        ));

        Ok(())
    }

    /// Ask the host to create a transport for one role. At most one request
    /// per role may be in flight.
    pub fn request_transport<S: Signaling>(
        &mut self,
        role: TransportRole,
        signaling: &S,
    ) -> Result<(), NegotiationError> {
        if !self.device.loaded() {
            return Err(NegotiationError::NotReady("webrtc_create_transport"));
        }

        let slot = self.slot_mut(role);
        if slot.outstanding {
            return Err(NegotiationError::RequestPending(role));
        }
        slot.outstanding = true;
        slot.params = None;
        self.state = NegotiationState::TransportsPending;

        signaling.send(RequestMessage::WebrtcCreateTransport(role));
        Ok(())
    }

    /// A `webrtc_transport_created` response arrived, correlated by role.
    /// A response for a role with nothing outstanding is ignored.
    pub fn on_transport_created(
        &mut self,
        created: TransportCreated,
    ) -> Result<(), NegotiationError> {
        let role = created.role;
        let slot = self.slot_mut(role);

        if !slot.outstanding {
            warn!(%role, "transport_created with no outstanding request, ignoring");
            return Ok(());
        }
        slot.outstanding = false;

        let params = match created.params {
            Some(params) if created.success => params,
            _ => return Err(NegotiationError::TransportRejected(role)),
        };

        debug!(%role, transport = %params.id, "transport created");
        slot.params = Some(params);

        if self.producer.params.is_some() && self.consumer.params.is_some() {
            self.state = NegotiationState::Ready;
        }
        Ok(())
    }

    pub fn transport_params(&self, role: TransportRole) -> Option<&TransportParams> {
        self.slot(role).params.as_ref()
    }

    /// Hand the host the DTLS parameters for a created transport.
    pub fn connect_transport<S: Signaling>(
        &self,
        role: TransportRole,
        dtls_parameters: DtlsParameters,
        signaling: &S,
    ) -> Result<(), NegotiationError> {
        if self.slot(role).params.is_none() {
            return Err(NegotiationError::NotReady("webrtc_connect_transport"));
        }
        signaling.send(RequestMessage::WebrtcConnectTransport(
            hostlink_core::ConnectTransport {
                role,
                dtls_parameters,
            },
        ));
        Ok(())
    }

    /// Announce an outbound media track on the producer transport.
    pub fn produce<S: Signaling>(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        signaling: &S,
    ) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Ready {
            return Err(NegotiationError::NotReady("webrtc_produce"));
        }
        signaling.send(RequestMessage::WebrtcProduce(hostlink_core::Produce {
            kind,
            rtp_parameters,
        }));
        Ok(())
    }

    /// Ask the host to start consuming audio for us, advertising the
    /// device's capabilities.
    pub fn consume_audio<S: Signaling>(&self, signaling: &S) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Ready {
            return Err(NegotiationError::NotReady("webrtc_consume_audio"));
        }
        signaling.send(RequestMessage::WebrtcConsumeAudio(
            hostlink_core::ConsumeAudio {
                rtp_capabilities: self.device.rtp_capabilities(),
            },
        ));
        Ok(())
    }

    /// Route an inbound consumer to the media stack. Ignored until the
    /// consumer transport exists.
    pub fn on_new_consumer(&mut self, consumer: NewConsumer) -> Result<(), NegotiationError> {
        if self.consumer.params.is_none() {
            warn!(consumer = %consumer.id, "new_consumer before consumer transport, ignoring");
            return Ok(());
        }
        self.device.consume(consumer)?;
        Ok(())
    }

    /// Back to square one: drops transports and device state. Called on
    /// every socket close so reconnection restarts the full exchange.
    pub fn reset(&mut self) {
        self.state = NegotiationState::Uninitialized;
        self.producer = RoleSlot::default();
        self.consumer = RoleSlot::default();
        self.device.reset();
    }

    fn slot(&self, role: TransportRole) -> &RoleSlot {
        match role {
            TransportRole::Producer => &self.producer,
            TransportRole::Consumer => &self.consumer,
        }
    }

    fn slot_mut(&mut self, role: TransportRole) -> &mut RoleSlot {
        match role {
            TransportRole::Producer => &mut self.producer,
            TransportRole::Consumer => &mut self.consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{transport_created, FakeDevice, RecordingSignaling};

    fn negotiator() -> TransportNegotiator<FakeDevice> {
        TransportNegotiator::new(FakeDevice::default())
    }

    #[tokio::test]
    async fn capabilities_trigger_transport_requests_in_order() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();

        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();

        assert_eq!(negotiator.state(), NegotiationState::TransportsPending);
        assert_eq!(
            signaling.types(),
            vec![
                "webrtc_create_transport",
                "webrtc_create_transport",
                "set_rtp_capabilities",
            ],
        );
    }

    #[tokio::test]
    async fn repeat_capabilities_are_a_no_op() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();

        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();

        assert_eq!(negotiator.device().load_calls, 1);
        assert_eq!(signaling.types().len(), 3);
    }

    #[tokio::test]
    async fn load_failure_returns_to_uninitialized() {
        let mut negotiator = TransportNegotiator::new(FakeDevice {
            fail_load: true,
            ..FakeDevice::default()
        });
        let signaling = RecordingSignaling::default();

        let err = negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::Device(_)));
        assert_eq!(negotiator.state(), NegotiationState::Uninitialized);
        assert!(signaling.types().is_empty());
    }

    #[tokio::test]
    async fn one_outstanding_request_per_role() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();

        let err = negotiator
            .request_transport(TransportRole::Producer, &signaling)
            .unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::RequestPending(TransportRole::Producer)
        ));
    }

    #[tokio::test]
    async fn both_transports_created_means_ready() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();

        negotiator
            .on_transport_created(transport_created(TransportRole::Producer, true))
            .unwrap();
        assert_eq!(negotiator.state(), NegotiationState::TransportsPending);

        negotiator
            .on_transport_created(transport_created(TransportRole::Consumer, true))
            .unwrap();
        assert_eq!(negotiator.state(), NegotiationState::Ready);
    }

    #[tokio::test]
    async fn rejected_transport_clears_the_slot() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();

        let err = negotiator
            .on_transport_created(transport_created(TransportRole::Producer, false))
            .unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::TransportRejected(TransportRole::Producer)
        ));

        // The slot is free again, so the step can be retried.
        negotiator
            .request_transport(TransportRole::Producer, &signaling)
            .unwrap();
    }

    #[tokio::test]
    async fn unexpected_transport_created_is_ignored() {
        let mut negotiator = negotiator();
        negotiator
            .on_transport_created(transport_created(TransportRole::Consumer, true))
            .unwrap();
        assert_eq!(negotiator.state(), NegotiationState::Uninitialized);
    }

    #[tokio::test]
    async fn reset_restarts_the_full_exchange() {
        let mut negotiator = negotiator();
        let signaling = RecordingSignaling::default();
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();
        negotiator
            .on_transport_created(transport_created(TransportRole::Producer, true))
            .unwrap();

        negotiator.reset();
        assert_eq!(negotiator.state(), NegotiationState::Uninitialized);
        assert!(!negotiator.device().loaded);

        // A fresh capability exchange loads the device again.
        negotiator
            .on_router_capabilities(RtpCapabilities::default(), &signaling)
            .await
            .unwrap();
        assert_eq!(negotiator.device().load_calls, 2);
        assert_eq!(negotiator.state(), NegotiationState::TransportsPending);
    }
}
