//! Signal Decoding Engine
//!
//! Extracts signal values from a reassembled response payload based on a
//! resolved signal rule. Handles bit extraction, endianness, sign extension
//! and the affine or formula transform.

use crate::signals::catalog::{BitField, ByteOrder, Scalar, SignalRule, Transform, ValueType};
use crate::signals::formula::FieldLookup;
use crate::types::{DecodeError, SignalValue};

/// Signal decoder - extracts values from response payloads
pub struct SignalDecoder;

/// Sub-field values extracted for one formula evaluation
struct ExtractedFields<'a> {
    raw: f64,
    fields: Vec<(&'a str, f64)>,
}

impl FieldLookup for ExtractedFields<'_> {
    fn raw(&self) -> f64 {
        self.raw
    }

    fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(field_name, _)| *field_name == name)
            .map(|(_, value)| *value)
    }
}

impl SignalDecoder {
    /// Decode the physical value of `rule` from `payload`
    ///
    /// `payload` is the response data after the command echo; bit offsets are
    /// relative to its first byte.
    pub fn decode(payload: &[u8], rule: &SignalRule) -> Result<SignalValue, DecodeError> {
        Self::decode_with_raw(payload, rule).map(|(value, _)| value)
    }

    /// Decode the physical value together with the raw primary field
    ///
    /// The raw value is `None` for unsigned 64-bit fields above `i64::MAX`.
    pub fn decode_with_raw(
        payload: &[u8],
        rule: &SignalRule,
    ) -> Result<(SignalValue, Option<i64>), DecodeError> {
        let raw = Self::extract_field(payload, &rule.field)?;
        let raw_value = i64::try_from(raw).ok();

        let value = match &rule.transform {
            Transform::Affine { mul, div, add } => Self::apply_affine(raw, *mul, *div, *add)?,
            Transform::Formula { fields, expr } => {
                let mut extracted = ExtractedFields {
                    raw: raw as f64,
                    fields: Vec::with_capacity(fields.len()),
                };
                for named in fields {
                    let value = Self::extract_field(payload, &named.field)?;
                    extracted.fields.push((named.name.as_str(), value as f64));
                }
                SignalValue::Float(expr.eval(&extracted)?)
            }
        };

        Ok((value, raw_value))
    }

    /// Extract one bit field as an integer
    ///
    /// Fails with `OutOfRange` instead of reading past the payload.
    pub fn extract_field(payload: &[u8], field: &BitField) -> Result<i128, DecodeError> {
        let payload_bits = payload.len() * 8;
        if field.bit_length == 0 || field.bit_length > 64 || field.end_bit() > payload_bits as u64 {
            log::debug!(
                "Field {}+{} does not fit a {}-bit payload",
                field.bit_offset,
                field.bit_length,
                payload_bits
            );
            return Err(DecodeError::OutOfRange {
                bit_offset: field.bit_offset,
                bit_length: field.bit_length,
                payload_bits,
            });
        }

        let start_bit = field.bit_offset as usize;
        let length = field.bit_length as usize;

        // Extract raw bits based on byte order
        let bits = match field.byte_order {
            ByteOrder::BigEndian => Self::extract_big_endian(payload, start_bit, length),
            ByteOrder::LittleEndian => Self::extract_little_endian(payload, start_bit, length),
        };

        // Apply sign extension if needed
        Ok(match field.value_type {
            ValueType::Unsigned => bits as i128,
            ValueType::Signed => Self::sign_extend(bits, length) as i128,
        })
    }

    /// `raw * mul / div + add`
    ///
    /// Integer constants without a divisor stay in exact integer arithmetic;
    /// anything else is computed in f64 in the same order.
    fn apply_affine(
        raw: i128,
        mul: Scalar,
        div: Option<Scalar>,
        add: Scalar,
    ) -> Result<SignalValue, DecodeError> {
        if let (Some(mul), None, Some(add)) = (mul.as_int(), div, add.as_int()) {
            let value = raw
                .checked_mul(mul as i128)
                .and_then(|v| v.checked_add(add as i128))
                .ok_or(DecodeError::Overflow)?;
            return i64::try_from(value)
                .map(SignalValue::Integer)
                .map_err(|_| DecodeError::Overflow);
        }

        let mut value = raw as f64 * mul.as_f64();
        if let Some(div) = div {
            let div = div.as_f64();
            if div == 0.0 {
                return Err(DecodeError::DivisionByZero);
            }
            value /= div;
        }
        Ok(SignalValue::Float(value + add.as_f64()))
    }

    /// Extract field with big-endian (Motorola) byte order
    ///
    /// - Start bit points to the MSB of the field
    /// - Bit numbering: bit 0 = MSB of byte 0, bit 7 = LSB of byte 0
    /// - Field grows towards higher bit numbers
    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = 7 - (bit_pos % 8);

            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
        }

        result
    }

    /// Extract field with little-endian (Intel) byte order
    ///
    /// - Start bit points to the LSB of the field
    /// - Bits are numbered from LSB to MSB within each byte
    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = bit_pos % 8;

            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << i;
        }

        result
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}
