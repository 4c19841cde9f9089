//! Signal decoding capability
//!
//! The decoder turns a raw frame payload into named physical values. The
//! definition grammar lives behind [`DecoderLoader`]; networks only see the
//! [`SignalDecoder`] trait.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::DecoderError;

/// One decoded signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalValue {
    /// Physical value: raw * factor + offset
    pub value: f64,
    pub raw: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Signal name -> value, empty when nothing matched
pub type DecodedSignals = BTreeMap<String, SignalValue>;

pub trait SignalDecoder: Send + Sync {
    /// Decode a payload; never fails, returns an empty map on no match
    fn decode(&self, frame_id: u32, payload: &[u8]) -> DecodedSignals;

    /// Number of message definitions held
    fn message_count(&self) -> usize;
}

/// Builds a decoder from a definition file
pub trait DecoderLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn SignalDecoder>, DecoderError>;
}

/// Loader that never produces a decoder
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecoderLoader;

impl DecoderLoader for NoopDecoderLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SignalDecoder>, DecoderError> {
        Err(DecoderError::Load {
            path: path.display().to_string(),
            reason: "signal decoding is not enabled".to_string(),
        })
    }
}
