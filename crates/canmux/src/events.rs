//! Manager events
//!
//! Everything a consumer can observe is published on one broadcast bus.
//! Network-scoped events carry their network id; manager-wide diagnostics
//! use [`SYSTEM_SCOPE`].

use serde::Serialize;
use tokio::sync::broadcast;

use canmux_core::{ConnectionState, FrameRecord, HardwareDescriptor, SYSTEM_SCOPE};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    NetworkAdded {
        network_id: String,
    },
    NetworkRemoved {
        network_id: String,
    },
    ConnectionStateChanged {
        network_id: String,
        state: ConnectionState,
    },
    FrameReceived(FrameRecord),
    FrameTransmitted(FrameRecord),
    Error {
        network_id: String,
        message: String,
    },
    HardwareDiscovered {
        hardware: Vec<HardwareDescriptor>,
    },
}

impl ManagerEvent {
    /// Network the event belongs to; `None` for hardware discovery
    pub fn network_id(&self) -> Option<&str> {
        match self {
            ManagerEvent::NetworkAdded { network_id }
            | ManagerEvent::NetworkRemoved { network_id }
            | ManagerEvent::ConnectionStateChanged { network_id, .. }
            | ManagerEvent::Error { network_id, .. } => Some(network_id),
            ManagerEvent::FrameReceived(record) | ManagerEvent::FrameTransmitted(record) => {
                Some(&record.network_id)
            }
            ManagerEvent::HardwareDiscovered { .. } => None,
        }
    }
}

/// Broadcast bus for [`ManagerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.tx.subscribe()
    }

    /// Publish; returns the number of subscribers reached. An event with no
    /// subscribers is dropped.
    pub fn emit(&self, event: ManagerEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn state_changed(&self, network_id: &str, state: ConnectionState) {
        tracing::debug!(network_id = %network_id, state = %state, "Connection state changed");
        self.emit(ManagerEvent::ConnectionStateChanged {
            network_id: network_id.to_string(),
            state,
        });
    }

    /// Publish a diagnostic and log it
    pub fn error(&self, network_id: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(network_id = %network_id, "{}", message);
        self.emit(ManagerEvent::Error {
            network_id: network_id.to_string(),
            message,
        });
    }

    pub fn system_error(&self, message: impl Into<String>) {
        self.error(SYSTEM_SCOPE, message);
    }
}
