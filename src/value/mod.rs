//! # Value Type System
//!
//! The compact tagged value stored in every column of every relation.
//!
//! ## Design Decisions
//!
//! - **Copy semantics**: strings and atoms are interned ids, so a `Value` is
//!   two machine words and never owns heap memory
//! - **Bitwise identity**: equality and hashing compare the type tag plus the
//!   raw payload bits, so `0.0` and `-0.0` are different values and `NaN`
//!   equals itself
//! - **Total order**: tag first, then payload, so tables and result sets can
//!   be sorted deterministically
//!
//! ## Usage
//!
//! ```
//! use deductive::value::Value;
//!
//! let a = Value::Integer(3);
//! let b = Value::Float(3.0);
//! assert_ne!(a, b);
//! assert!(a < b); // integers sort before floats
//! ```

pub mod encoding;

use crate::interner::{Interner, StrId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Row of values. Stored rows are fixed-length and never contain `None`.
pub type Row = Vec<Value>;

/// Type tag of a [`Value`], in sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueKind {
    None = 0,
    Boolean = 1,
    Integer = 2,
    Float = 3,
    Char = 4,
    Byte = 5,
    String = 6,
    Atom = 7,
    Opaque = 8,
}

/// A dynamically-typed value that can be stored in a row
#[derive(Debug, Clone, Copy, Default)]
pub enum Value {
    /// Unbound / missing. Never stored in a table row.
    #[default]
    None,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Interned string datum
    String(StrId),
    /// Interned symbolic atom
    Atom(StrId),
    /// Unicode scalar value (kept as raw `u32` so decoding is total)
    Char(u32),
    Byte(u8),
    /// Generated entity identifier
    Opaque(u64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::String(_) => ValueKind::String,
            Value::Atom(_) => ValueKind::Atom,
            Value::Char(_) => ValueKind::Char,
            Value::Byte(_) => ValueKind::Byte,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// Raw payload bits. Together with [`Value::kind`] this is the identity
    /// of the value.
    pub fn payload_bits(&self) -> u64 {
        match *self {
            Value::None => 0,
            Value::Integer(v) => v as u64,
            Value::Float(v) => v.to_bits(),
            Value::Boolean(b) => u64::from(b),
            Value::String(id) | Value::Atom(id) => u64::from(id.0),
            Value::Char(c) => u64::from(c),
            Value::Byte(b) => u64::from(b),
            Value::Opaque(id) => id,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view with integer-to-float promotion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Interned id of a string or atom.
    pub fn as_str_id(&self) -> Option<StrId> {
        match self {
            Value::String(id) | Value::Atom(id) => Some(*id),
            _ => None,
        }
    }

    pub fn string(strings: &mut Interner, text: &str) -> Self {
        Value::String(strings.intern(text))
    }

    pub fn atom(strings: &mut Interner, text: &str) -> Self {
        Value::Atom(strings.intern(text))
    }

    /// Render with strings resolved through the interner.
    pub fn display<'a>(&'a self, strings: &'a Interner) -> DisplayValue<'a> {
        DisplayValue {
            value: self,
            strings,
        }
    }

    /// 64-bit mix of tag and payload, used by the table hash indexes.
    #[inline]
    pub fn hash_bits(&self) -> u64 {
        let tag = self.kind() as u64;
        mix(self.payload_bits() ^ tag.rotate_left(59))
    }
}

/// Finaliser from splitmix64.
#[inline]
pub(crate) fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Hash a sequence of values (a row or the bound columns of a template).
#[inline]
pub fn hash_values<'a, I: IntoIterator<Item = &'a Value>>(values: I) -> u64 {
    let mut h: u64 = 0x51_7c_c1_b7_27_22_0a_95;
    for v in values {
        h = mix(h ^ v.hash_bits()).wrapping_add(0x9e37_79b9_7f4a_7c15);
    }
    h
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.payload_bits() == other.payload_bits()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.kind() as u8).hash(state);
        self.payload_bits().hash(state);
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            _ => self
                .kind()
                .cmp(&other.kind())
                .then_with(|| self.payload_bits().cmp(&other.payload_bits())),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c as u32)
    }
}

impl From<u8> for Value {
    fn from(b: u8) -> Self {
        Value::Byte(b)
    }
}

/// Interner-aware display adapter returned by [`Value::display`].
pub struct DisplayValue<'a> {
    value: &'a Value,
    strings: &'a Interner,
}

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.value {
            Value::String(id) => write!(f, "\"{}\"", self.strings.display(id)),
            Value::Atom(id) => write!(f, "{}", self.strings.display(id)),
            ref other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::String(id) => write!(f, "\"{id}\""),
            Value::Atom(id) => write!(f, "{id}"),
            Value::Char(c) => match char::from_u32(*c) {
                Some(ch) => write!(f, "'{ch}'"),
                None => write!(f, "'\\u{{{c:x}}}'"),
            },
            Value::Byte(b) => write!(f, "0x{b:02x}"),
            Value::Opaque(id) => write!(f, "<{id}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_float_identity_is_bitwise() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_tags_distinguish_equal_payloads() {
        assert_ne!(Value::String(StrId(1)), Value::Atom(StrId(1)));
        assert_ne!(Value::Integer(1), Value::Boolean(true));
        assert_ne!(Value::Byte(65), Value::Char(65));
    }

    #[test]
    fn test_ordering_is_total() {
        let mut values = vec![
            Value::Atom(StrId(0)),
            Value::Integer(5),
            Value::Float(-1.5),
            Value::Integer(-3),
            Value::Boolean(false),
            Value::None,
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::None,
                Value::Boolean(false),
                Value::Integer(-3),
                Value::Integer(5),
                Value::Float(-1.5),
                Value::Atom(StrId(0)),
            ]
        );
    }

    #[test]
    fn test_hash_matches_eq() {
        let set: HashSet<Value> = [Value::Integer(1), Value::Integer(1), Value::Float(1.0)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_with_interner() {
        let mut strings = Interner::new();
        let s = Value::string(&mut strings, "tweety");
        let a = Value::atom(&mut strings, "bird");
        assert_eq!(s.display(&strings).to_string(), "\"tweety\"");
        assert_eq!(a.display(&strings).to_string(), "bird");
        assert_eq!(Value::Integer(4).display(&strings).to_string(), "4");
    }

    #[test]
    fn test_row_hash_depends_on_order() {
        let a = [Value::Integer(1), Value::Integer(2)];
        let b = [Value::Integer(2), Value::Integer(1)];
        assert_ne!(hash_values(&a), hash_values(&b));
        assert_eq!(hash_values(&a), hash_values(&a.to_vec()));
    }
}
