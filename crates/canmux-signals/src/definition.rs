//! Message and signal definitions

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{parse_frame_id, SignalError, SignalResult};

/// Bit numbering of a signal within the payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel: `start_bit` is the LSB, bits grow upward
    #[default]
    #[serde(alias = "intel", alias = "little")]
    LittleEndian,
    /// Motorola: `start_bit` is the MSB, bits run in sawtooth order
    #[serde(alias = "motorola", alias = "big")]
    BigEndian,
}

/// One signal packed into a message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub name: String,
    pub start_bit: u16,
    pub length: u8,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

fn default_factor() -> f64 {
    1.0
}

impl SignalDefinition {
    /// Unsigned little-endian signal with unit scaling
    pub fn new(name: impl Into<String>, start_bit: u16, length: u8) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            unit: None,
            min: None,
            max: None,
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.byte_order = ByteOrder::BigEndian;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn scaled(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Physical value clamped to `[min, max]` when bounds are given
    pub fn to_physical(&self, raw: i64) -> f64 {
        let mut value = raw as f64 * self.factor + self.offset;
        if let Some(min) = self.min {
            value = value.max(min);
        }
        if let Some(max) = self.max {
            value = value.min(max);
        }
        value
    }

    fn check(&self, message: &str) -> SignalResult<()> {
        let invalid = |reason: &str| SignalError::InvalidSignal {
            message: message.to_string(),
            signal: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.length == 0 || self.length > 64 {
            return Err(invalid("length must be 1..=64 bits"));
        }
        // 64 bytes is the largest CAN FD payload
        if self.start_bit >= 512 {
            return Err(invalid("start bit beyond a 64 byte payload"));
        }
        if self.factor == 0.0 || !self.factor.is_finite() {
            return Err(invalid("factor must be finite and non-zero"));
        }
        Ok(())
    }
}

/// One message with its signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDefinition {
    #[serde(deserialize_with = "deserialize_frame_id")]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub extended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u8>,
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
}

impl MessageDefinition {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            extended: id > 0x7FF,
            length: None,
            signals: Vec::new(),
        }
    }

    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn validate(&self) -> SignalResult<()> {
        for signal in &self.signals {
            signal.check(&self.name)?;
        }
        Ok(())
    }
}

/// Frame ids are written either as integers or as `"0x..."` strings
fn deserialize_frame_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u32),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => parse_frame_id(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_defaults_from_yaml() {
        let yaml = r#"
name: Speed
start_bit: 8
length: 16
"#;
        let signal: SignalDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(signal.byte_order, ByteOrder::LittleEndian);
        assert!(!signal.signed);
        assert_eq!(signal.factor, 1.0);
        assert_eq!(signal.offset, 0.0);
        assert!(signal.unit.is_none());
    }

    #[test]
    fn test_byte_order_aliases() {
        let order: ByteOrder = serde_yaml::from_str("motorola").unwrap();
        assert_eq!(order, ByteOrder::BigEndian);
        let order: ByteOrder = serde_yaml::from_str("intel").unwrap();
        assert_eq!(order, ByteOrder::LittleEndian);
    }

    #[test]
    fn test_message_id_forms() {
        let from_int: MessageDefinition = serde_yaml::from_str("id: 256\nname: A").unwrap();
        assert_eq!(from_int.id, 0x100);
        let from_hex: MessageDefinition = serde_yaml::from_str("id: \"0x7E8\"\nname: B").unwrap();
        assert_eq!(from_hex.id, 0x7E8);
        let bad: Result<MessageDefinition, _> = serde_yaml::from_str("id: \"nope\"\nname: C");
        assert!(bad.is_err());
    }

    #[test]
    fn test_physical_value_and_clamp() {
        let mut signal = SignalDefinition::new("Temp", 0, 8).scaled(0.5, -40.0);
        assert_eq!(signal.to_physical(100), 10.0);
        signal.max = Some(5.0);
        assert_eq!(signal.to_physical(100), 5.0);
    }

    #[test]
    fn test_validate_rejects_bad_layout() {
        let message = MessageDefinition::new(0x100, "Bad").with_signal(SignalDefinition::new("Zero", 0, 0));
        assert!(matches!(
            message.validate(),
            Err(SignalError::InvalidSignal { .. })
        ));

        let message = MessageDefinition::new(0x100, "Ok").with_signal(SignalDefinition::new("Byte", 0, 8));
        assert!(message.validate().is_ok());
    }
}
