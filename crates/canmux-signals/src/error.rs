//! Error types for signal definitions

use thiserror::Error;

/// Errors that can occur while loading signal definitions
#[derive(Debug, Error)]
pub enum SignalError {
    /// Invalid frame identifier string
    #[error("invalid frame id: {0}")]
    InvalidFrameId(String),

    /// Signal layout does not fit a CAN payload
    #[error("invalid signal {signal} in message {message}: {reason}")]
    InvalidSignal {
        message: String,
        signal: String,
        reason: String,
    },

    /// Unsupported file extension
    #[error("unsupported definition format: {0}")]
    UnsupportedFormat(String),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for signal definition operations
pub type SignalResult<T> = Result<T, SignalError>;

/// Parse a frame id: decimal, or hex with a `0x` prefix
pub fn parse_frame_id(s: &str) -> SignalResult<u32> {
    let trimmed = s.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|_| SignalError::InvalidFrameId(s.to_string()))
}
