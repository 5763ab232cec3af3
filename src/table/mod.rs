//! # Tuple Store
//!
//! Set-semantic, append-only storage for the rows of one relation.
//!
//! ## Layout
//!
//! ```text
//! Table
//!   |-- Nullary      present / delta flags, no rows
//!   |-- Unary..Quaternary   RowTable<FixedRows<N>>
//!   `-- Wide         RowTable<WideRows>
//!
//! RowTable
//!   |-- rows         append-only, offsets never move
//!   |-- primary      open-addressed offsets, one per distinct row
//!   |-- secondary    lazily built, keyed by bound-column mask
//!   `-- delta window [delta_start, delta_end)
//! ```
//!
//! ## Windows
//!
//! Rows appended during a round stay invisible to readers until the next
//! [`Table::next_iteration`], which moves the window to cover exactly
//! those rows. A full read covers `[0, delta_end)`, a delta read
//! `[delta_start, delta_end)`.
//!
//! ## Access paths
//!
//! | Bound mask | Path |
//! |------------|------|
//! | empty | scan of the window |
//! | every column | direct probe of the primary index |
//! | anything else | secondary index for that mask |

pub mod primary;
pub mod primes;
pub mod rows;
pub mod secondary;

pub use rows::{FixedRows, RowStore, WideRows};
pub use secondary::{ColumnMask, IndexStats, SecondaryIndex};

use crate::error::EngineError;
use crate::value::{hash_values, Row, Value};
use primary::{PrimaryIndex, Slot};
use std::collections::HashMap;

/// Largest arity a bound-column mask can describe.
pub const MAX_ARITY: usize = 64;

/// Which part of a table a read covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Window {
    /// Everything visible: `[0, delta_end)`
    #[default]
    Full,
    /// Rows added in the previous round: `[delta_start, delta_end)`
    Delta,
}

/// Access path chosen for a bound mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPath {
    Scan,
    Probe,
    Index(ColumnMask),
}

impl AccessPath {
    pub fn for_mask(mask: ColumnMask, arity: usize) -> Self {
        if mask.is_empty() {
            AccessPath::Scan
        } else if mask.is_full(arity) {
            AccessPath::Probe
        } else {
            AccessPath::Index(mask)
        }
    }
}

/// Rows of one arity with primary and secondary indexes.
#[derive(Debug, Clone)]
pub struct RowTable<S: RowStore> {
    store: S,
    hashes: Vec<u64>,
    primary: PrimaryIndex,
    secondary: HashMap<ColumnMask, SecondaryIndex>,
    delta_start: usize,
    delta_end: usize,
}

impl<S: RowStore> RowTable<S> {
    pub fn new(store: S, initial_capacity: usize) -> Self {
        RowTable {
            store,
            hashes: Vec::new(),
            primary: PrimaryIndex::with_capacity(initial_capacity),
            secondary: HashMap::new(),
            delta_start: 0,
            delta_end: 0,
        }
    }

    pub fn arity(&self) -> usize {
        self.store.arity()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Insert `row` unless an equal row is already stored.
    pub fn add(&mut self, row: &[Value]) -> bool {
        if row.len() != self.store.arity() || row.iter().any(Value::is_none) {
            return false;
        }
        if self.primary.needs_grow() {
            let replay = self
                .hashes
                .iter()
                .enumerate()
                .map(|(offset, &hash)| (offset as u32, hash));
            self.primary.grow(replay);
        }
        let hash = hash_values(row);
        let store = &self.store;
        match self.primary.find(hash, |offset| store.row(offset as usize) == row) {
            Slot::Found(_) => false,
            Slot::Vacant(cell) => {
                let offset = self.store.len() as u32;
                self.store.push(row);
                self.hashes.push(hash);
                self.primary.occupy(cell, offset);
                true
            }
        }
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        if row.len() != self.store.arity() {
            return false;
        }
        let store = &self.store;
        matches!(
            self.primary
                .find(hash_values(row), |offset| store.row(offset as usize) == row),
            Slot::Found(_)
        )
    }

    pub fn row(&self, offset: usize) -> &[Value] {
        self.store.row(offset)
    }

    fn bounds(&self, window: Window) -> (usize, usize) {
        match window {
            Window::Full => (0, self.delta_end),
            Window::Delta => (self.delta_start, self.delta_end),
        }
    }

    /// Offsets of rows in `window` agreeing with `template` on `mask`.
    pub fn matching(&mut self, template: &[Value], mask: ColumnMask, window: Window) -> Vec<u32> {
        let (lo, hi) = self.bounds(window);
        if lo >= hi {
            return Vec::new();
        }
        match AccessPath::for_mask(mask, self.arity()) {
            AccessPath::Scan => (lo as u32..hi as u32).collect(),
            AccessPath::Probe => {
                let store = &self.store;
                let found = self.primary.find(hash_values(template), |offset| {
                    store.row(offset as usize) == template
                });
                match found {
                    Slot::Found(offset) if (lo..hi).contains(&(offset as usize)) => vec![offset],
                    _ => Vec::new(),
                }
            }
            AccessPath::Index(mask) => {
                let index = self
                    .secondary
                    .entry(mask)
                    .or_insert_with(|| SecondaryIndex::new(mask));
                index.catch_up(&self.store);
                index.lookup(&self.store, template, lo, hi)
            }
        }
    }

    pub fn next_iteration(&mut self) {
        self.delta_start = self.delta_end;
        self.delta_end = self.store.len();
        for index in self.secondary.values_mut() {
            index.catch_up(&self.store);
        }
    }

    /// Forget the window so the next round treats every row as new.
    pub fn rewind_delta(&mut self) {
        self.delta_start = 0;
        self.delta_end = 0;
    }

    pub fn delta_start(&self) -> usize {
        self.delta_start
    }

    pub fn delta_end(&self) -> usize {
        self.delta_end
    }

    pub fn declare_index(&mut self, mask: ColumnMask) {
        if !matches!(AccessPath::for_mask(mask, self.arity()), AccessPath::Index(_)) {
            return;
        }
        let index = self
            .secondary
            .entry(mask)
            .or_insert_with(|| SecondaryIndex::new(mask));
        index.catch_up(&self.store);
    }

    pub fn index_masks(&self) -> Vec<ColumnMask> {
        let mut masks: Vec<ColumnMask> = self.secondary.keys().copied().collect();
        masks.sort();
        masks
    }

    pub fn index_stats(&self, mask: ColumnMask) -> Option<IndexStats> {
        self.secondary.get(&mask).map(SecondaryIndex::stats)
    }

    pub fn approx_bytes(&self) -> usize {
        self.store.approx_bytes()
            + self.hashes.len() * std::mem::size_of::<u64>()
            + self.primary.approx_bytes()
            + self
                .secondary
                .values()
                .map(SecondaryIndex::approx_bytes)
                .sum::<usize>()
    }
}

/// Table of a zero-arity predicate: either the empty row is present or not.
#[derive(Debug, Clone, Default)]
pub struct NullaryTable {
    present: bool,
    visible: bool,
    delta: bool,
}

impl NullaryTable {
    pub fn arity(&self) -> usize {
        0
    }

    pub fn len(&self) -> usize {
        usize::from(self.present)
    }

    pub fn add(&mut self, row: &[Value]) -> bool {
        if !row.is_empty() || self.present {
            return false;
        }
        self.present = true;
        true
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        row.is_empty() && self.present
    }

    pub fn row(&self, _offset: usize) -> &[Value] {
        &[]
    }

    pub fn matching(&mut self, _template: &[Value], _mask: ColumnMask, window: Window) -> Vec<u32> {
        let hit = match window {
            Window::Full => self.visible,
            Window::Delta => self.delta,
        };
        if hit {
            vec![0]
        } else {
            Vec::new()
        }
    }

    pub fn next_iteration(&mut self) {
        self.delta = self.present && !self.visible;
        self.visible = self.present;
    }

    pub fn rewind_delta(&mut self) {
        self.visible = false;
        self.delta = false;
    }

    pub fn delta_start(&self) -> usize {
        usize::from(self.visible && !self.delta)
    }

    pub fn delta_end(&self) -> usize {
        usize::from(self.visible)
    }

    pub fn declare_index(&mut self, _mask: ColumnMask) {}

    pub fn index_masks(&self) -> Vec<ColumnMask> {
        Vec::new()
    }

    pub fn index_stats(&self, _mask: ColumnMask) -> Option<IndexStats> {
        None
    }

    pub fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Storage of one relation, specialised by arity.
#[derive(Debug, Clone)]
pub enum Table {
    Nullary(NullaryTable),
    Unary(RowTable<FixedRows<1>>),
    Binary(RowTable<FixedRows<2>>),
    Ternary(RowTable<FixedRows<3>>),
    Quaternary(RowTable<FixedRows<4>>),
    Wide(RowTable<WideRows>),
}

macro_rules! dispatch {
    ($table:expr, $inner:ident => $body:expr) => {
        match $table {
            Table::Nullary($inner) => $body,
            Table::Unary($inner) => $body,
            Table::Binary($inner) => $body,
            Table::Ternary($inner) => $body,
            Table::Quaternary($inner) => $body,
            Table::Wide($inner) => $body,
        }
    };
}

impl Table {
    /// Empty table for rows of `arity` columns.
    pub fn new(arity: usize, initial_capacity: usize) -> Result<Self, EngineError> {
        let table = match arity {
            0 => Table::Nullary(NullaryTable::default()),
            1 => Table::Unary(RowTable::new(FixedRows::new(), initial_capacity)),
            2 => Table::Binary(RowTable::new(FixedRows::new(), initial_capacity)),
            3 => Table::Ternary(RowTable::new(FixedRows::new(), initial_capacity)),
            4 => Table::Quaternary(RowTable::new(FixedRows::new(), initial_capacity)),
            n if n <= MAX_ARITY => Table::Wide(RowTable::new(WideRows::new(n), initial_capacity)),
            n => return Err(EngineError::ArityTooLarge { arity: n }),
        };
        Ok(table)
    }

    pub fn arity(&self) -> usize {
        dispatch!(self, t => t.arity())
    }

    /// Number of stored rows, visible or not.
    pub fn len(&self) -> usize {
        dispatch!(self, t => t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row; `false` if it was already present or malformed.
    pub fn add(&mut self, row: &[Value]) -> bool {
        dispatch!(self, t => t.add(row))
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        dispatch!(self, t => t.contains(row))
    }

    pub fn row(&self, offset: usize) -> &[Value] {
        dispatch!(self, t => t.row(offset))
    }

    /// Offsets of rows in `window` that agree with `template` on `mask`.
    pub fn matching(&mut self, template: &[Value], mask: ColumnMask, window: Window) -> Vec<u32> {
        dispatch!(self, t => t.matching(template, mask, window))
    }

    /// Visible rows matching the bound columns of `template`.
    pub fn query(&mut self, template: &[Value]) -> Vec<Row> {
        self.collect(template, Window::Full)
    }

    /// Rows of the current delta window matching `template`.
    pub fn query_delta(&mut self, template: &[Value]) -> Vec<Row> {
        self.collect(template, Window::Delta)
    }

    fn collect(&mut self, template: &[Value], window: Window) -> Vec<Row> {
        if template.len() != self.arity() {
            return Vec::new();
        }
        let mask = ColumnMask::of_template(template);
        self.matching(template, mask, window)
            .into_iter()
            .map(|offset| self.row(offset as usize).to_vec())
            .collect()
    }

    /// Close the current round: the rows appended since the previous call
    /// become the delta window.
    pub fn next_iteration(&mut self) {
        dispatch!(self, t => t.next_iteration())
    }

    pub fn rewind_delta(&mut self) {
        dispatch!(self, t => t.rewind_delta())
    }

    pub fn delta_start(&self) -> usize {
        dispatch!(self, t => t.delta_start())
    }

    pub fn delta_end(&self) -> usize {
        dispatch!(self, t => t.delta_end())
    }

    pub fn delta_len(&self) -> usize {
        self.delta_end() - self.delta_start()
    }

    /// Build (or keep maintaining) the secondary index for `mask`.
    pub fn declare_index(&mut self, mask: ColumnMask) {
        dispatch!(self, t => t.declare_index(mask))
    }

    pub fn index_masks(&self) -> Vec<ColumnMask> {
        dispatch!(self, t => t.index_masks())
    }

    pub fn index_stats(&self, mask: ColumnMask) -> Option<IndexStats> {
        dispatch!(self, t => t.index_stats(mask))
    }

    pub fn approx_bytes(&self) -> usize {
        dispatch!(self, t => t.approx_bytes())
    }

    /// Every stored row in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> + '_ {
        (0..self.len()).map(move |offset| self.row(offset))
    }
}
