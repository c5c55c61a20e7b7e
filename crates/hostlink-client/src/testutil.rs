//! Shared helpers for the crate's tests.

use std::sync::Mutex;

use hostlink_core::{
    DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, IceProtocol, NewConsumer,
    RequestMessage, RtpCapabilities, TransportCreated, TransportParams, TransportRole,
};

use crate::device::{DeviceError, MediaDevice};
use crate::session::Signaling;

/// Signaling channel that records every outbound message.
#[derive(Default)]
pub struct RecordingSignaling {
    pub sent: Mutex<Vec<RequestMessage>>,
}

impl RecordingSignaling {
    /// Wire `type` tags of everything sent, in order.
    pub fn types(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| {
                serde_json::to_value(message).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

impl Signaling for RecordingSignaling {
    fn send(&self, message: RequestMessage) {
        self.sent.lock().unwrap().push(message);
    }
}

/// Device that records loads and can be told to fail.
#[derive(Default)]
pub struct FakeDevice {
    pub loaded: bool,
    pub load_calls: usize,
    pub fail_load: bool,
    pub consumed: Vec<NewConsumer>,
    pub capabilities: RtpCapabilities,
}

impl MediaDevice for FakeDevice {
    fn loaded(&self) -> bool {
        self.loaded
    }

    async fn load(&mut self, capabilities: RtpCapabilities) -> Result<(), DeviceError> {
        self.load_calls += 1;
        if self.fail_load {
            return Err(DeviceError("load refused".to_string()));
        }
        self.capabilities = capabilities;
        self.loaded = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.loaded = false;
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    fn consume(&mut self, consumer: NewConsumer) -> Result<(), DeviceError> {
        self.consumed.push(consumer);
        Ok(())
    }
}

/// A `webrtc_transport_created` payload with plausible transport params.
pub fn transport_created(role: TransportRole, success: bool) -> TransportCreated {
    TransportCreated {
        success,
        role,
        params: success.then(|| TransportParams {
            id: format!("{role}-transport"),
            ice_parameters: IceParameters {
                username_fragment: "ufrag".to_string(),
                password: "pass".to_string(),
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
                    value: "AA:BB:CC".to_string(),
                }],
            },
        }),
    }
}
