//! Common error types for network management, transports and discovery

use thiserror::Error;

/// Result type for network management operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors returned by Connection, Network and NetworkManager operations
///
/// None of these are raised as panics; they are returned as values and
/// mirrored as `(network_id, message)` diagnostics on the event bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Frame submitted while the connection is not `Connected`
    #[error("Not connected to CAN interface")]
    NotConnected,

    /// Frame submitted on a listen-only network
    #[error("Cannot send messages in listen-only mode")]
    ListenOnlyViolation,

    /// Another connected network already holds this hardware
    #[error("Hardware interface already in use: {0}")]
    HardwareInUse(String),

    /// Hardware key is not part of the current snapshot
    #[error("Hardware interface not found: {0}")]
    HardwareNotFound(String),

    /// Unknown network id
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// `connect()` on a network without bound hardware
    #[error("No hardware interface assigned")]
    NoHardwareAssigned,

    /// Network is live on different hardware
    #[error("Network is connected to {0}; disconnect it before rebinding")]
    HardwareLocked(String),

    /// Frame identifier or payload outside CAN limits
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport could not be opened
    #[error("Failed to connect: {0}")]
    TransportOpenFailed(String),

    /// Transport rejected a frame
    #[error("Failed to send message: {0}")]
    TransportSendFailed(String),

    /// Hardware discovery exceeded its budget
    #[error("Hardware discovery timed out: {0}")]
    DiscoveryTimeout(String),

    /// Profile file could not be read or written
    #[error("Configuration persistence failed: {0}")]
    PersistenceFailed(String),

    /// Command sent to a runtime that has shut down
    #[error("Network manager runtime is not running")]
    RuntimeStopped,
}

/// Transport layer errors
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Hardware discovery errors, always contained within a single backend
#[derive(Debug, Error, Clone)]
pub enum DiscoveryError {
    #[error("{backend} discovery timed out after {budget_ms} ms")]
    Timeout { backend: String, budget_ms: u64 },

    #[error("{backend} discovery failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("{backend} discovery unavailable: {reason}")]
    Unavailable { backend: String, reason: String },
}

impl DiscoveryError {
    /// Name of the backend that produced the error
    pub fn backend(&self) -> &str {
        match self {
            DiscoveryError::Timeout { backend, .. }
            | DiscoveryError::Backend { backend, .. }
            | DiscoveryError::Unavailable { backend, .. } => backend,
        }
    }
}

impl From<DiscoveryError> for NetworkError {
    fn from(err: DiscoveryError) -> Self {
        NetworkError::DiscoveryTimeout(err.to_string())
    }
}

/// Signal definition loading errors
#[derive(Debug, Error, Clone)]
pub enum DecoderError {
    #[error("Failed to load signal definitions from {path}: {reason}")]
    Load { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_messages() {
        assert_eq!(
            NetworkError::HardwareInUse("virtual:virtual0".to_string()).to_string(),
            "Hardware interface already in use: virtual:virtual0"
        );
        assert_eq!(
            NetworkError::ListenOnlyViolation.to_string(),
            "Cannot send messages in listen-only mode"
        );
    }

    #[test]
    fn test_discovery_error_backend() {
        let err = DiscoveryError::Timeout {
            backend: "SocketCAN".to_string(),
            budget_ms: 5000,
        };
        assert_eq!(err.backend(), "SocketCAN");
        assert_eq!(
            err.to_string(),
            "SocketCAN discovery timed out after 5000 ms"
        );
    }
}
