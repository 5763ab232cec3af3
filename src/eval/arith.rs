//! Arithmetic and comparison over [`Value`]s.
//!
//! Integer operations are checked: overflow and division by zero produce no
//! value. Mixing an integer with a float promotes to float. `+` on two
//! strings concatenates through the interner. Any other type combination is
//! undefined and produces no value.

use crate::ast::{ArithOp, CompareOp};
use crate::interner::Interner;
use crate::value::Value;
use std::cmp::Ordering;
use tracing::trace;

pub fn arith(op: ArithOp, left: Value, right: Value, strings: &mut Interner) -> Option<Value> {
    let result = match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => a.checked_div(b),
            ArithOp::Mod => a.checked_rem(b),
        }
        .map(Value::Integer),
        (Value::String(a), Value::String(b)) if op == ArithOp::Add => {
            let joined = format!(
                "{}{}",
                strings.resolve(a).unwrap_or_default(),
                strings.resolve(b).unwrap_or_default()
            );
            Some(Value::String(strings.intern(&joined)))
        }
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Some(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Mod => a % b,
            })),
            _ => None,
        },
    };
    if result.is_none() {
        trace!(%op, left = %left, right = %right, "arith_undefined");
    }
    result
}

/// Ordering used by comparisons: numbers compare numerically across
/// integer and float, strings by their text, everything else by the total
/// value order.
fn ordering(left: Value, right: Value, strings: &Interner) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(&b)),
        (Value::String(a), Value::String(b)) | (Value::Atom(a), Value::Atom(b)) => {
            Some(strings.resolve(a).cmp(&strings.resolve(b)))
        }
        (l, r) if l.is_numeric() && r.is_numeric() => {
            let (a, b) = (l.as_f64()?, r.as_f64()?);
            a.partial_cmp(&b)
        }
        (l, r) => Some(l.cmp(&r)),
    }
}

pub fn compare(op: CompareOp, left: Value, right: Value, strings: &Interner) -> bool {
    // Equality between non-numeric values is identity.
    if !(left.is_numeric() && right.is_numeric()) {
        match op {
            CompareOp::Eq => return left == right,
            CompareOp::Ne => return left != right,
            _ => {}
        }
    }
    let Some(ord) = ordering(left, right, strings) else {
        // NaN on one side.
        return op == CompareOp::Ne;
    };
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    }
}
