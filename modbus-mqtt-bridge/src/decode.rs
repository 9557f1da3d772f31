//! Register decoding for the supported sensor variants.
//!
//! All functions here are pure; the poller hands them the registers it read.

use crate::config::SensorConfig;
use resmon_common::SensorValue;
use thiserror::Error;

/// Decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("insufficient data: need {needed} registers, got {available}")]
    InsufficientData { needed: usize, available: usize },
}

/// Order of the two 16-bit words that make up a 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// High word first (`ABCD`).
    Abcd,
    /// Low word first (`CDAB`), the vendor layout of the NER sensors.
    Cdab,
}

/// The single register of a direct reading, unmodified.
pub fn decode_direct(registers: &[u16]) -> Result<u16, DecodeError> {
    registers
        .first()
        .copied()
        .ok_or(DecodeError::InsufficientData {
            needed: 1,
            available: 0,
        })
}

/// Rebuild an IEEE-754 single from its high and low words.
///
/// The words arrive in the order given by `order`: for [`WordOrder::Cdab`]
/// `first` is the low word, for [`WordOrder::Abcd`] it is the high word.
/// Within each word the bytes are big-endian.
pub fn decode_f32(first: u16, second: u16, order: WordOrder) -> f32 {
    let (high, low) = match order {
        WordOrder::Abcd => (first, second),
        WordOrder::Cdab => (second, first),
    };
    let [hh, hl] = high.to_be_bytes();
    let [lh, ll] = low.to_be_bytes();
    f32::from_be_bytes([hh, hl, lh, ll])
}

/// Extract the word-swapped float located at `offset` within a read span.
pub fn decode_composite(registers: &[u16], offset: u16) -> Result<f32, DecodeError> {
    let offset = usize::from(offset);
    let needed = offset + 2;
    match registers.get(offset..needed) {
        Some(&[first, second]) => Ok(decode_f32(first, second, WordOrder::Cdab)),
        _ => Err(DecodeError::InsufficientData {
            needed,
            available: registers.len(),
        }),
    }
}

/// Decode the registers read for `sensor`.
pub fn decode_sensor(sensor: &SensorConfig, registers: &[u16]) -> Result<SensorValue, DecodeError> {
    match sensor {
        SensorConfig::Direct { .. } => decode_direct(registers).map(SensorValue::from),
        SensorConfig::CompositeFloat { offset, .. } => {
            decode_composite(registers, *offset).map(SensorValue::from)
        }
    }
}
