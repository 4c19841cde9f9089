//! File-backed decoder loader

use std::path::Path;
use std::sync::Arc;

use canmux_core::{DecoderError, DecoderLoader, SignalDecoder};

use crate::database::SignalDatabase;

/// Loads a [`SignalDatabase`] from a YAML or JSON definition file
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoderLoader;

impl DecoderLoader for FileDecoderLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SignalDecoder>, DecoderError> {
        let db = SignalDatabase::from_file(path).map_err(|e| DecoderError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(
            path = %path.display(),
            messages = db.len(),
            "Loaded signal definitions"
        );
        Ok(Arc::new(db))
    }
}
