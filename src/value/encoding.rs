//! Binary Value Encoding
//!
//! One opcode byte followed by 0-8 little-endian payload bytes. Integers in
//! `(-0x60, 0x7f]` are written as a single byte whose signed value *is* the
//! integer; every other opcode lives in `0x80..=0x8f`.
//!
//! | Opcode | Meaning | Payload |
//! |--------|---------|---------|
//! | `0x80` | None | - |
//! | `0x81` | Byte | 1 |
//! | `0x82`/`0x83`/`0x84` | Char 32/16/8 | 4/2/1 |
//! | `0x85` | Float 64 | 8 |
//! | `0x86` | Opaque id | 8 |
//! | `0x87`/`0x88` | Atom id 32/16 | 4/2 |
//! | `0x89`/`0x8a` | String id 32/16 | 4/2 |
//! | `0x8b`/`0x8c` | false/true | - |
//! | `0x8d`/`0x8e`/`0x8f` | Integer 64/32/16 | 8/4/2 |
//!
//! The encoder always picks the smallest form that round-trips exactly.

use super::Value;
use crate::interner::StrId;

pub const OP_NONE: u8 = 0x80;
pub const OP_BYTE: u8 = 0x81;
pub const OP_CHAR32: u8 = 0x82;
pub const OP_CHAR16: u8 = 0x83;
pub const OP_CHAR8: u8 = 0x84;
pub const OP_FLOAT64: u8 = 0x85;
pub const OP_OPAQUE: u8 = 0x86;
pub const OP_ATOM32: u8 = 0x87;
pub const OP_ATOM16: u8 = 0x88;
pub const OP_STRING32: u8 = 0x89;
pub const OP_STRING16: u8 = 0x8a;
pub const OP_FALSE: u8 = 0x8b;
pub const OP_TRUE: u8 = 0x8c;
pub const OP_INT64: u8 = 0x8d;
pub const OP_INT32: u8 = 0x8e;
pub const OP_INT16: u8 = 0x8f;

/// Smallest integer written inline (exclusive bound is `-0x60`).
pub const INLINE_MIN: i64 = -0x5f;
/// Largest integer written inline.
pub const INLINE_MAX: i64 = 0x7f;

/// Decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown value opcode 0x{0:02x}")]
    UnknownOpcode(u8),
}

/// Append the encoding of `value` to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match *value {
        Value::None => out.push(OP_NONE),
        Value::Integer(v) => {
            if (INLINE_MIN..=INLINE_MAX).contains(&v) {
                out.push(v as i8 as u8);
            } else if let Ok(small) = i16::try_from(v) {
                out.push(OP_INT16);
                out.extend_from_slice(&small.to_le_bytes());
            } else if let Ok(mid) = i32::try_from(v) {
                out.push(OP_INT32);
                out.extend_from_slice(&mid.to_le_bytes());
            } else {
                out.push(OP_INT64);
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Value::Float(v) => {
            out.push(OP_FLOAT64);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Boolean(false) => out.push(OP_FALSE),
        Value::Boolean(true) => out.push(OP_TRUE),
        Value::String(id) => encode_id(id, OP_STRING16, OP_STRING32, out),
        Value::Atom(id) => encode_id(id, OP_ATOM16, OP_ATOM32, out),
        Value::Char(c) => {
            if let Ok(narrow) = u8::try_from(c) {
                out.push(OP_CHAR8);
                out.push(narrow);
            } else if let Ok(mid) = u16::try_from(c) {
                out.push(OP_CHAR16);
                out.extend_from_slice(&mid.to_le_bytes());
            } else {
                out.push(OP_CHAR32);
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        Value::Byte(b) => {
            out.push(OP_BYTE);
            out.push(b);
        }
        Value::Opaque(id) => {
            out.push(OP_OPAQUE);
            out.extend_from_slice(&id.to_le_bytes());
        }
    }
}

fn encode_id(id: StrId, narrow: u8, wide: u8, out: &mut Vec<u8>) {
    if let Ok(small) = u16::try_from(id.0) {
        out.push(narrow);
        out.extend_from_slice(&small.to_le_bytes());
    } else {
        out.push(wide);
        out.extend_from_slice(&id.0.to_le_bytes());
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut out);
    out
}

/// Number of bytes [`encode_into`] will write for `value`.
pub fn encoded_len(value: &Value) -> usize {
    match *value {
        Value::None | Value::Boolean(_) => 1,
        Value::Integer(v) if (INLINE_MIN..=INLINE_MAX).contains(&v) => 1,
        Value::Integer(v) if i16::try_from(v).is_ok() => 3,
        Value::Integer(v) if i32::try_from(v).is_ok() => 5,
        Value::Integer(_) | Value::Float(_) | Value::Opaque(_) => 9,
        Value::String(id) | Value::Atom(id) if u16::try_from(id.0).is_ok() => 3,
        Value::String(_) | Value::Atom(_) => 5,
        Value::Char(c) if c <= 0xff => 2,
        Value::Char(c) if c <= 0xffff => 3,
        Value::Char(_) => 5,
        Value::Byte(_) => 2,
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    let payload = bytes.get(1..=N).ok_or(DecodeError::Truncated {
        needed: N + 1,
        available: bytes.len(),
    })?;
    let mut buf = [0u8; N];
    buf.copy_from_slice(payload);
    Ok(buf)
}

/// Decode one value from the front of `bytes`, returning it with the number
/// of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
    let op = *bytes.first().ok_or(DecodeError::Truncated {
        needed: 1,
        available: 0,
    })?;
    let inline = op as i8;
    if i64::from(inline) >= INLINE_MIN {
        return Ok((Value::Integer(i64::from(inline)), 1));
    }
    let decoded = match op {
        OP_NONE => (Value::None, 1),
        OP_BYTE => (Value::Byte(take::<1>(bytes)?[0]), 2),
        OP_CHAR8 => (Value::Char(u32::from(take::<1>(bytes)?[0])), 2),
        OP_CHAR16 => (
            Value::Char(u32::from(u16::from_le_bytes(take::<2>(bytes)?))),
            3,
        ),
        OP_CHAR32 => (Value::Char(u32::from_le_bytes(take::<4>(bytes)?)), 5),
        OP_FLOAT64 => (
            Value::Float(f64::from_bits(u64::from_le_bytes(take::<8>(bytes)?))),
            9,
        ),
        OP_OPAQUE => (Value::Opaque(u64::from_le_bytes(take::<8>(bytes)?)), 9),
        OP_ATOM16 => (
            Value::Atom(StrId(u32::from(u16::from_le_bytes(take::<2>(bytes)?)))),
            3,
        ),
        OP_ATOM32 => (Value::Atom(StrId(u32::from_le_bytes(take::<4>(bytes)?))), 5),
        OP_STRING16 => (
            Value::String(StrId(u32::from(u16::from_le_bytes(take::<2>(bytes)?)))),
            3,
        ),
        OP_STRING32 => (
            Value::String(StrId(u32::from_le_bytes(take::<4>(bytes)?))),
            5,
        ),
        OP_FALSE => (Value::Boolean(false), 1),
        OP_TRUE => (Value::Boolean(true), 1),
        OP_INT16 => (
            Value::Integer(i64::from(i16::from_le_bytes(take::<2>(bytes)?))),
            3,
        ),
        OP_INT32 => (
            Value::Integer(i64::from(i32::from_le_bytes(take::<4>(bytes)?))),
            5,
        ),
        OP_INT64 => (Value::Integer(i64::from_le_bytes(take::<8>(bytes)?)), 9),
        other => return Err(DecodeError::UnknownOpcode(other)),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let bytes = encode(&value);
        assert_eq!(bytes.len(), encoded_len(&value), "length of {value:?}");
        let (back, used) = decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back, value);
        assert_eq!(back.payload_bits(), value.payload_bits());
    }

    #[test]
    fn test_inline_integer_boundaries() {
        assert_eq!(encode(&Value::Integer(0x7f)), vec![0x7f]);
        assert_eq!(encode(&Value::Integer(-0x5f)), vec![0xa1]);
        // -0x60 is the first value that no longer fits inline
        assert_eq!(encode(&Value::Integer(-0x60))[0], OP_INT16);
        assert_eq!(encode(&Value::Integer(0x80))[0], OP_INT16);
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(encode(&Value::Integer(1000)).len(), 3);
        assert_eq!(encode(&Value::Integer(0x7fff_ffff))[0], OP_INT32);
        assert_eq!(encode(&Value::Integer(0xafff_ffff))[0], OP_INT64);
        assert_eq!(encode(&Value::Integer(i64::MIN))[0], OP_INT64);
    }

    #[test]
    fn test_id_widths() {
        assert_eq!(encode(&Value::String(StrId(0xffff)))[0], OP_STRING16);
        assert_eq!(encode(&Value::String(StrId(0x10000)))[0], OP_STRING32);
        assert_eq!(encode(&Value::Atom(StrId(0x7fff)))[0], OP_ATOM16);
        assert_eq!(encode(&Value::Atom(StrId(0x10000)))[0], OP_ATOM32);
    }

    #[test]
    fn test_every_variant_roundtrips() {
        for v in -1000..=1000 {
            roundtrip(Value::Integer(v));
        }
        for id in [0u32, 0x7fff, 0x8000, 0xffff, 0x10000, u32::MAX] {
            roundtrip(Value::String(StrId(id)));
            roundtrip(Value::Atom(StrId(id)));
        }
        for v in [0x7fff_ffff_i64, 0xafff_ffff, i64::MAX, i64::MIN] {
            roundtrip(Value::Integer(v));
        }
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Boolean(false));
        roundtrip(Value::None);
        roundtrip(Value::Float(-0.0));
        roundtrip(Value::Float(f64::NAN));
        roundtrip(Value::Char(0x41));
        roundtrip(Value::Char(0x3bb));
        roundtrip(Value::Char(0x1f600));
        roundtrip(Value::Byte(0xff));
        roundtrip(Value::Opaque(u64::MAX));
    }

    #[test]
    fn test_truncated_payload() {
        let err = decode(&[OP_INT32, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                needed: 5,
                available: 3
            }
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode(&[0x90]), Err(DecodeError::UnknownOpcode(0x90)));
        assert_eq!(decode(&[0xa0]), Err(DecodeError::UnknownOpcode(0xa0)));
    }
}
