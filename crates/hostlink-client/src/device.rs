//! Media device abstraction.

use hostlink_core::{NewConsumer, RtpCapabilities};

/// Error from the local media stack.
#[derive(Debug, Clone, thiserror::Error)]
#[error("media device: {0}")]
pub struct DeviceError(pub String);

/// Local endpoint of the media stack.
///
/// The negotiator drives this through capability load and consumer routing;
/// everything codec-level happens behind it.
#[allow(async_fn_in_trait)]
pub trait MediaDevice: Send {
    /// Whether router capabilities have been loaded.
    fn loaded(&self) -> bool;

    /// Load the router's capabilities. May suspend while the local media
    /// stack negotiates. Single-shot per session; the negotiator checks
    /// [`MediaDevice::loaded`] first.
    async fn load(&mut self, capabilities: RtpCapabilities) -> Result<(), DeviceError>;

    /// Discard loaded state so the next capability exchange starts fresh.
    fn reset(&mut self);

    /// Capabilities the device ended up with. Empty until loaded.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Accept an inbound consumer the host created for us.
    fn consume(&mut self, consumer: NewConsumer) -> Result<(), DeviceError>;
}

/// Device that accepts whatever it is given and produces no media.
#[derive(Debug, Default)]
pub struct NullDevice {
    capabilities: Option<RtpCapabilities>,
}

impl MediaDevice for NullDevice {
    fn loaded(&self) -> bool {
        self.capabilities.is_some()
    }

    async fn load(&mut self, capabilities: RtpCapabilities) -> Result<(), DeviceError> {
        self.capabilities = Some(capabilities);
        Ok(())
    }

    fn reset(&mut self) {
        self.capabilities = None;
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone().unwrap_or_default()
    }

    fn consume(&mut self, _consumer: NewConsumer) -> Result<(), DeviceError> {
        Ok(())
    }
}
