//! Self-delimiting numeric values.
//!
//! Every octet carries seven bits of the value, most significant chunk first.
//! All octets but the last have their high bit set.
//!
//! Magnitudes are stored in a bit-packed variant of the same encoding, see
//! [encode_magnitude].

use crate::magnitude::{Magnitude, ONE_GIG};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Maximum number of octets of an encoded `u64`.
pub const MAX_LEN: usize = 10;

/// Maximum number of significant bits of a packed magnitude.
pub const MAX_PACKED_BITS: u32 = 61;

/// Bits reserved for the low part of a packed magnitude.
const LOW_BITS: u32 = 30;

/// Largest high part a packed magnitude can carry.
const MAX_PACKED_HIGH: i64 = (1 << (MAX_PACKED_BITS - LOW_BITS)) - 1;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing value")]
    Empty,
    #[error("value is not terminated")]
    Truncated,
    #[error("value is longer than {} octets", MAX_LEN)]
    TooLong,
    #[error("value does not fit in 64 bits")]
    Overflow,
    #[error("magnitude is wider than {} bits", MAX_PACKED_BITS)]
    TooWide,
    #[error("magnitude low part {0} is not below {max}", max = ONE_GIG)]
    NotCanonical(u64),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("cannot encode invalid magnitude {0}")]
    Invalid(Magnitude),
    #[error("magnitude {0} is wider than {bits} bits", bits = MAX_PACKED_BITS)]
    TooWide(Magnitude),
}

/// Number of octets needed to encode `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = u64::BITS - value.leading_zeros();
    (bits as usize).div_ceil(7).max(1)
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_into(value: u64, buf: &mut impl BufMut) {
    let len = encoded_len(value);
    for index in (0..len).rev() {
        let chunk = (value >> (7 * index)) as u8 & 0x7f;
        let flag = if index == 0 { 0 } else { 0x80 };
        buf.put_u8(chunk | flag);
    }
}

pub fn encode(value: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(value));
    encode_into(value, &mut buf);
    buf.freeze()
}

/// Decodes a value from the start of `buf`.
///
/// Returns the value and the number of octets it occupied.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut value: u64 = 0;
    for (index, &octet) in buf.iter().enumerate() {
        if index == MAX_LEN {
            return Err(DecodeError::TooLong);
        }
        if value >> (u64::BITS - 7) != 0 {
            return Err(DecodeError::Overflow);
        }

        value = value << 7 | u64::from(octet & 0x7f);
        if octet & 0x80 == 0 {
            return Ok((value, index + 1));
        }
    }

    Err(DecodeError::Truncated)
}

/// Decodes a value and advances `cursor` past it.
///
/// The cursor is left untouched on error.
pub fn extract(cursor: &mut &[u8]) -> Result<u64, DecodeError> {
    let (value, len) = decode(cursor).inspect_err(|e| log::debug!("extract failed: {e}"))?;
    *cursor = &cursor[len..];
    Ok(value)
}

/// Like [extract], truncating the value to 32 bits.
pub fn extract_small(cursor: &mut &[u8]) -> Result<u32, DecodeError> {
    extract(cursor).map(|value| value as u32)
}

/// Encodes a magnitude in its packed record form.
///
/// A magnitude with no high part is the plain encoding of its low part.
/// Otherwise the low part fills the last thirty bits, so the fifth octet from the end
/// holds the two top bits of `low` under the five bottom bits of `high`, and the
/// remaining bits of `high` follow in leading octets.
pub fn encode_magnitude(magnitude: &Magnitude) -> Result<Bytes, EncodeError> {
    if !magnitude.is_valid() {
        return Err(EncodeError::Invalid(*magnitude));
    }
    if magnitude.high() > MAX_PACKED_HIGH {
        return Err(EncodeError::TooWide(*magnitude));
    }

    let packed = (magnitude.high() as u64) << LOW_BITS | magnitude.low() as u64;
    Ok(encode(packed))
}

/// Decodes a packed magnitude from the start of `buf`.
pub fn decode_magnitude(buf: &[u8]) -> Result<(Magnitude, usize), DecodeError> {
    let first = *buf.first().ok_or(DecodeError::Empty)?;
    let len = buf
        .iter()
        .position(|octet| octet & 0x80 == 0)
        .ok_or(DecodeError::Truncated)?
        + 1;

    // Leading zero bits of the first octet do not count.
    let significant = 7 - (first & 0x7f).leading_zeros().saturating_sub(1);
    let width = significant + 7 * (len as u32 - 1);
    if width > MAX_PACKED_BITS {
        return Err(DecodeError::TooWide);
    }

    let (packed, len) = decode(&buf[..len])?;
    let high = packed >> LOW_BITS;
    let low = packed & ((1 << LOW_BITS) - 1);
    if low >= ONE_GIG as u64 {
        return Err(DecodeError::NotCanonical(low));
    }

    Ok((Magnitude::from_parts(high as i64, low as i64), len))
}

impl Serialize for Magnitude {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = encode_magnitude(self).map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for Magnitude {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PackedVisitor;

        impl de::Visitor<'_> for PackedVisitor {
            type Value = Magnitude;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a packed magnitude")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                let (magnitude, len) = decode_magnitude(v).map_err(E::custom)?;
                if len != v.len() {
                    return Err(E::invalid_length(v.len(), &self));
                }
                Ok(magnitude)
            }
        }

        deserializer.deserialize_bytes(PackedVisitor)
    }
}
