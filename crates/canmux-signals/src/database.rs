//! Signal database - container for message definitions
//!
//! Provides lookup by frame id and implements [`SignalDecoder`] so a network
//! can decode its traffic without knowing the file format.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use canmux_core::{DecodedSignals, SignalDecoder, SignalValue};

use crate::decode::extract_raw;
use crate::definition::MessageDefinition;
use crate::error::{SignalError, SignalResult};

/// Thread-safe store of message definitions
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// Frame id -> message definition
    messages: RwLock<HashMap<u32, MessageDefinition>>,
    /// Message name -> frame id
    name_index: RwLock<HashMap<String, u32>>,
    meta: RwLock<DatabaseMeta>,
}

/// Metadata about the definition set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// On-disk layout shared by the YAML and JSON forms
#[derive(Debug, Default, Serialize, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    meta: Option<DatabaseMeta>,
    #[serde(default)]
    messages: Vec<MessageDefinition>,
}

impl SignalDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(name: impl Into<String>, version: impl Into<String>) -> Self {
        let db = Self::new();
        *db.meta.write() = DatabaseMeta {
            name: Some(name.into()),
            version: Some(version.into()),
            description: None,
        };
        db
    }

    /// Load definitions from a file, picking the format by extension
    ///
    /// `.json` is parsed as JSON; `.yaml`, `.yml` and files without an
    /// extension as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> SignalResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") | None => Self::from_yaml(&content),
            Some(other) => Err(SignalError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_yaml(yaml: &str) -> SignalResult<Self> {
        let file: DefinitionFile = serde_yaml::from_str(yaml)?;
        Self::from_definition_file(file)
    }

    pub fn from_json(json: &str) -> SignalResult<Self> {
        let file: DefinitionFile = serde_json::from_str(json)?;
        Self::from_definition_file(file)
    }

    fn from_definition_file(file: DefinitionFile) -> SignalResult<Self> {
        let db = Self::new();
        if let Some(meta) = file.meta {
            *db.meta.write() = meta;
        }
        for message in file.messages {
            message.validate()?;
            db.register(message);
        }
        Ok(db)
    }

    /// Register a message; a later definition for the same frame id wins
    pub fn register(&self, message: MessageDefinition) {
        let mut messages = self.messages.write();
        if let Some(previous) = messages.get(&message.id) {
            tracing::debug!(
                frame_id = format_args!("0x{:X}", message.id),
                replaced = %previous.name,
                "Replacing message definition"
            );
            self.name_index.write().remove(&previous.name);
        }
        self.name_index.write().insert(message.name.clone(), message.id);
        messages.insert(message.id, message);
    }

    pub fn get(&self, frame_id: u32) -> Option<MessageDefinition> {
        self.messages.read().get(&frame_id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<MessageDefinition> {
        let id = *self.name_index.read().get(name)?;
        self.get(id)
    }

    pub fn contains(&self, frame_id: u32) -> bool {
        self.messages.read().contains_key(&frame_id)
    }

    /// All registered frame ids, sorted
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    pub fn meta(&self) -> DatabaseMeta {
        self.meta.read().clone()
    }

    /// Serialize the database back to YAML
    pub fn to_yaml(&self) -> SignalResult<String> {
        let mut messages: Vec<MessageDefinition> = self.messages.read().values().cloned().collect();
        messages.sort_by_key(|m| m.id);
        let file = DefinitionFile {
            meta: Some(self.meta()),
            messages,
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Decode every signal of the message matching `frame_id`
    ///
    /// Signals that do not fit the payload are skipped.
    pub fn decode_frame(&self, frame_id: u32, payload: &[u8]) -> DecodedSignals {
        let messages = self.messages.read();
        let Some(message) = messages.get(&frame_id) else {
            return DecodedSignals::new();
        };

        let mut out = DecodedSignals::new();
        for signal in &message.signals {
            match extract_raw(signal, payload) {
                Some(raw) => {
                    out.insert(
                        signal.name.clone(),
                        SignalValue {
                            value: signal.to_physical(raw),
                            raw,
                            unit: signal.unit.clone(),
                        },
                    );
                }
                None => {
                    tracing::trace!(
                        message = %message.name,
                        signal = %signal.name,
                        payload_len = payload.len(),
                        "Signal outside payload"
                    );
                }
            }
        }
        out
    }
}

impl SignalDecoder for SignalDatabase {
    fn decode(&self, frame_id: u32, payload: &[u8]) -> DecodedSignals {
        self.decode_frame(frame_id, payload)
    }

    fn message_count(&self) -> usize {
        self.len()
    }
}
