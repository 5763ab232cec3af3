//! Append-only row storage, specialised by arity.
//!
//! Arities 1-4 store `[Value; N]` arrays so the row width is a compile-time
//! constant; wider relations store one flat `Vec<Value>` and carry their
//! width at runtime.

use crate::value::Value;
use std::fmt;

/// Append-only storage of fixed-width rows.
pub trait RowStore: fmt::Debug {
    fn arity(&self) -> usize;
    fn len(&self) -> usize;
    fn row(&self, offset: usize) -> &[Value];
    /// Append a row of exactly `arity()` values.
    fn push(&mut self, row: &[Value]);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn approx_bytes(&self) -> usize {
        self.len() * self.arity() * std::mem::size_of::<Value>()
    }
}

#[derive(Debug, Clone)]
pub struct FixedRows<const N: usize> {
    rows: Vec<[Value; N]>,
}

impl<const N: usize> FixedRows<N> {
    pub fn new() -> Self {
        FixedRows { rows: Vec::new() }
    }
}

impl<const N: usize> Default for FixedRows<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RowStore for FixedRows<N> {
    fn arity(&self) -> usize {
        N
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    fn row(&self, offset: usize) -> &[Value] {
        &self.rows[offset]
    }

    fn push(&mut self, row: &[Value]) {
        let mut fixed = [Value::None; N];
        fixed.copy_from_slice(row);
        self.rows.push(fixed);
    }
}

#[derive(Debug, Clone)]
pub struct WideRows {
    arity: usize,
    values: Vec<Value>,
}

impl WideRows {
    pub fn new(arity: usize) -> Self {
        WideRows {
            arity,
            values: Vec::new(),
        }
    }
}

impl RowStore for WideRows {
    fn arity(&self) -> usize {
        self.arity
    }

    fn len(&self) -> usize {
        self.values.len() / self.arity
    }

    #[inline]
    fn row(&self, offset: usize) -> &[Value] {
        let start = offset * self.arity;
        &self.values[start..start + self.arity]
    }

    fn push(&mut self, row: &[Value]) {
        debug_assert_eq!(row.len(), self.arity);
        self.values.extend_from_slice(row);
    }
}
