//! Transport provider dispatching on hardware kind

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use canmux_core::{
    CanFrame, CanTransport, FrameSink, HardwareDescriptor, HardwareKind, OpenOptions,
    TransportError, TransportProvider,
};

use crate::settings::VirtualBusSettings;
use crate::vendor;
use crate::virtual_bus::{VirtualChannel, VirtualTransport};

/// Opens the real backend for each [`HardwareKind`]
///
/// Clones share the virtual channels, so a clone kept outside the manager
/// can drive the channels the manager opened.
#[derive(Debug, Clone, Default)]
pub struct BackendTransportProvider {
    virtual_bus: VirtualBusSettings,
    channels: Arc<Mutex<BTreeMap<String, VirtualChannel>>>,
}

impl BackendTransportProvider {
    pub fn new(virtual_bus: VirtualBusSettings) -> Self {
        Self {
            virtual_bus,
            channels: Arc::default(),
        }
    }

    /// Control handle for a virtual channel, created on first use
    pub fn virtual_channel(&self, channel: &str) -> VirtualChannel {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| VirtualChannel::new(channel, &self.virtual_bus))
            .clone()
    }
}

#[async_trait]
impl TransportProvider for BackendTransportProvider {
    async fn open(
        &self,
        hardware: &HardwareDescriptor,
        options: &OpenOptions,
        sink: FrameSink,
    ) -> Result<Box<dyn CanTransport>, TransportError> {
        tracing::debug!(
            hardware_key = %hardware.key(),
            bitrate = options.bitrate,
            protocol = %options.protocol,
            link = %sink.link(),
            "Opening transport"
        );

        match hardware.kind {
            HardwareKind::Virtual => Ok(Box::new(VirtualTransport::open(
                &self.virtual_channel(&hardware.channel),
                options,
                &self.virtual_bus,
                sink,
            ))),
            #[cfg(all(target_os = "linux", feature = "socketcan"))]
            HardwareKind::SocketCan => {
                let transport =
                    crate::socketcan::SocketCanTransport::open(&hardware.channel, options, sink)
                        .await?;
                Ok(Box::new(transport))
            }
            #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
            HardwareKind::SocketCan => Err(TransportError::Unsupported(
                "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
            )),
            HardwareKind::Pcan | HardwareKind::Vector | HardwareKind::Kvaser => {
                vendor::open(hardware)
            }
        }
    }
}

/// Reject frames the network cannot carry
pub fn check_frame(frame: &CanFrame, options: &OpenOptions) -> Result<(), TransportError> {
    frame.validate().map_err(TransportError::InvalidFrame)?;
    if frame.error {
        return Err(TransportError::InvalidFrame(
            "error frames cannot be transmitted".to_string(),
        ));
    }
    if frame.fd && !options.protocol.is_fd() {
        return Err(TransportError::InvalidFrame(format!(
            "CAN FD frame on a {} network",
            options.protocol
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canmux_core::{LinkId, NetworkConfig, Protocol};
    use tokio::sync::mpsc;

    fn options(protocol: Protocol) -> OpenOptions {
        OpenOptions::from(&NetworkConfig {
            protocol,
            ..Default::default()
        })
    }

    #[test]
    fn test_check_frame() {
        let classic = options(Protocol::Can20B);
        assert!(check_frame(&CanFrame::standard(0x100, vec![1, 2]), &classic).is_ok());
        assert!(check_frame(&CanFrame::standard(0x800, vec![]), &classic).is_err());
        assert!(check_frame(&CanFrame::error_frame(), &classic).is_err());

        let fd_frame = CanFrame::standard(0x100, vec![0; 12]).with_fd(true);
        assert!(check_frame(&fd_frame, &classic).is_err());
        assert!(check_frame(&fd_frame, &options(Protocol::CanFd)).is_ok());
    }

    #[tokio::test]
    async fn test_vendor_kinds_unsupported() {
        let provider = BackendTransportProvider::new(VirtualBusSettings::silent());
        let (tx, _rx) = mpsc::channel(4);
        let hardware = HardwareDescriptor::new(HardwareKind::Kvaser, "0", "Kvaser CAN 1", "");
        let result = provider
            .open(
                &hardware,
                &options(Protocol::Can20B),
                FrameSink::new("net", LinkId::next(), tx),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_opens_virtual() {
        let provider = BackendTransportProvider::new(VirtualBusSettings::silent());
        let (tx, _rx) = mpsc::channel(4);
        let mut transport = provider
            .open(
                &HardwareDescriptor::virtual_channel(0),
                &options(Protocol::Can20B),
                FrameSink::new("net", LinkId::next(), tx),
            )
            .await
            .unwrap();
        transport
            .send(&CanFrame::standard(0x123, vec![0xAA]))
            .await
            .unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_virtual_channel_handle_shared_with_clones() {
        let provider = BackendTransportProvider::new(VirtualBusSettings::silent());
        let outside = provider.clone();
        let (tx, mut rx) = mpsc::channel(4);
        let _transport = provider
            .open(
                &HardwareDescriptor::virtual_channel(1),
                &options(Protocol::Can20B),
                FrameSink::new("net", LinkId::next(), tx),
            )
            .await
            .unwrap();

        assert!(outside.virtual_channel("virtual1").is_open());
        assert!(!outside.virtual_channel("virtual0").is_open());
        assert!(outside.virtual_channel("virtual1").inject(CanFrame::standard(0x42, vec![7])));
        assert_eq!(rx.try_recv().unwrap().event, canmux_core::LinkEvent::Frame(CanFrame::standard(0x42, vec![7])));
    }
}
