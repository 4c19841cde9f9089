//! Vendor SDK adapter families (PCAN, Vector, Kvaser)
//!
//! These need proprietary driver libraries that are not linked into this
//! build. Discovery reports the backend as unavailable and opening a
//! channel fails with [`TransportError::Unsupported`].

use canmux_core::{
    CanTransport, DiscoveryError, HardwareDescriptor, HardwareKind, TransportError,
};

use crate::discovery::DiscoveryBackend;

/// Display name of a vendor family
pub fn vendor_name(kind: HardwareKind) -> &'static str {
    match kind {
        HardwareKind::Pcan => "PCAN",
        HardwareKind::Vector => "Vector",
        HardwareKind::Kvaser => "Kvaser",
        HardwareKind::Virtual => "Virtual",
        HardwareKind::SocketCan => "SocketCAN",
    }
}

pub(crate) fn open(hardware: &HardwareDescriptor) -> Result<Box<dyn CanTransport>, TransportError> {
    Err(TransportError::Unsupported(format!(
        "{} adapters need the {} driver SDK, which is not available in this build ({})",
        vendor_name(hardware.kind),
        vendor_name(hardware.kind),
        hardware.key()
    )))
}

/// Discovery backend for one vendor family
#[derive(Debug, Clone, Copy)]
pub struct VendorSdkBackend {
    kind: HardwareKind,
}

impl VendorSdkBackend {
    pub fn new(kind: HardwareKind) -> Self {
        Self { kind }
    }

    /// One backend per vendor family
    pub fn all() -> Vec<Self> {
        [HardwareKind::Pcan, HardwareKind::Vector, HardwareKind::Kvaser]
            .into_iter()
            .map(Self::new)
            .collect()
    }
}

impl DiscoveryBackend for VendorSdkBackend {
    fn name(&self) -> &str {
        vendor_name(self.kind)
    }

    fn enumerate(&self) -> Result<Vec<HardwareDescriptor>, DiscoveryError> {
        Err(DiscoveryError::Unavailable {
            backend: self.name().to_string(),
            reason: "driver SDK not linked".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_backends_unavailable() {
        let backends = VendorSdkBackend::all();
        assert_eq!(backends.len(), 3);
        for backend in backends {
            let err = backend.enumerate().unwrap_err();
            assert!(matches!(err, DiscoveryError::Unavailable { .. }));
            assert_eq!(err.backend(), backend.name());
        }
    }

    #[test]
    fn test_open_unsupported() {
        let hw = HardwareDescriptor::new(HardwareKind::Pcan, "PCAN_USBBUS1", "PEAK USB CAN 1", "");
        match open(&hw) {
            Err(TransportError::Unsupported(msg)) => assert!(msg.contains("pcan:PCAN_USBBUS1")),
            _ => panic!("expected Unsupported"),
        }
    }
}
