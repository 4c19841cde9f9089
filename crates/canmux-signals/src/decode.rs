//! Bit-level signal extraction

use crate::definition::{ByteOrder, SignalDefinition};

fn bit_at(payload: &[u8], pos: u32) -> Option<u64> {
    let byte = payload.get((pos / 8) as usize)?;
    Some(u64::from((byte >> (pos % 8)) & 1))
}

/// Extract the raw (unscaled) value of a signal
///
/// Returns `None` when the signal extends past the end of the payload.
pub fn extract_raw(signal: &SignalDefinition, payload: &[u8]) -> Option<i64> {
    let length = u32::from(signal.length);
    if length == 0 || length > 64 {
        return None;
    }

    let mut raw: u64 = 0;
    let mut pos = u32::from(signal.start_bit);
    match signal.byte_order {
        ByteOrder::LittleEndian => {
            for i in 0..length {
                raw |= bit_at(payload, pos + i)? << i;
            }
        }
        ByteOrder::BigEndian => {
            for i in 0..length {
                raw = (raw << 1) | bit_at(payload, pos)?;
                if i + 1 == length {
                    break;
                }
                // Motorola sawtooth: walk down a byte, then jump to the MSB of the next
                if pos % 8 == 0 {
                    pos += 15;
                } else {
                    pos -= 1;
                }
            }
        }
    }

    Some(if signal.signed { sign_extend(raw, length) } else { raw as i64 })
}

fn sign_extend(raw: u64, length: u32) -> i64 {
    if length >= 64 {
        return raw as i64;
    }
    let shift = 64 - length;
    ((raw << shift) as i64) >> shift
}
