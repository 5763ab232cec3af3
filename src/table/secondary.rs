//! Secondary indexes keyed by bound-column mask.
//!
//! # Architecture
//!
//! ```text
//! RowTable
//!   `-- HashMap<ColumnMask, SecondaryIndex>
//!         `-- SecondaryIndex
//!               |-- HashMap<u64, Vec<u32>>  (hash of bound columns -> offsets)
//!               |-- indexed                 (rows replayed so far)
//!               `-- IndexStats              (for plan explanation)
//! ```
//!
//! An index is created the first time a query uses its mask (or when the
//! optimizer declares it) and afterwards only replays rows appended since
//! the last catch-up. Bucket hits are candidates: the caller still compares
//! the bound columns, since distinct keys may share a hash.

use super::rows::RowStore;
use crate::value::{hash_values, Value};
use std::collections::HashMap;
use std::fmt;

/// Set of bound columns, bit `i` standing for column `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnMask(pub u64);

impl ColumnMask {
    pub const EMPTY: ColumnMask = ColumnMask(0);

    /// Mask binding every column of an `arity`-wide row.
    pub fn full(arity: usize) -> Self {
        if arity >= 64 {
            ColumnMask(u64::MAX)
        } else {
            ColumnMask((1u64 << arity) - 1)
        }
    }

    /// Mask of the columns whose template value is bound.
    pub fn of_template(template: &[Value]) -> Self {
        let mut mask = 0u64;
        for (col, value) in template.iter().enumerate().take(64) {
            if !value.is_none() {
                mask |= 1 << col;
            }
        }
        ColumnMask(mask)
    }

    pub fn with(self, column: usize) -> Self {
        ColumnMask(self.0 | (1 << column))
    }

    pub fn contains(self, column: usize) -> bool {
        column < 64 && self.0 & (1 << column) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_full(self, arity: usize) -> bool {
        self == Self::full(arity)
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Bound columns in ascending order.
    pub fn columns(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..64).filter(move |c| bits & (1 << c) != 0)
    }
}

impl fmt::Display for ColumnMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.columns().map(|c| c.to_string()).collect();
        write!(f, "[{}]", cols.join(","))
    }
}

/// Counters kept per index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub lookups: u64,
    pub candidates: u64,
}

#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    mask: ColumnMask,
    buckets: HashMap<u64, Vec<u32>>,
    indexed: usize,
    stats: IndexStats,
}

impl SecondaryIndex {
    pub fn new(mask: ColumnMask) -> Self {
        SecondaryIndex {
            mask,
            buckets: HashMap::new(),
            indexed: 0,
            stats: IndexStats::default(),
        }
    }

    pub fn mask(&self) -> ColumnMask {
        self.mask
    }

    /// Number of rows replayed into the index.
    pub fn indexed(&self) -> usize {
        self.indexed
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    fn key_of(&self, row: &[Value]) -> u64 {
        hash_values(self.mask.columns().map(|c| &row[c]))
    }

    /// Replay rows appended to `store` since the last call.
    pub fn catch_up<S: RowStore>(&mut self, store: &S) {
        for offset in self.indexed..store.len() {
            let key = self.key_of(store.row(offset));
            self.buckets.entry(key).or_default().push(offset as u32);
        }
        self.indexed = store.len();
    }

    /// Offsets in `[lo, hi)` whose bound columns equal those of `template`.
    pub fn lookup<S: RowStore>(
        &mut self,
        store: &S,
        template: &[Value],
        lo: usize,
        hi: usize,
    ) -> Vec<u32> {
        self.stats.lookups += 1;
        let Some(bucket) = self.buckets.get(&self.key_of(template)) else {
            return Vec::new();
        };
        // Offsets are appended in ascending order.
        let start = bucket.partition_point(|&o| (o as usize) < lo);
        let mask = self.mask;
        let hits: Vec<u32> = bucket[start..]
            .iter()
            .copied()
            .take_while(|&o| (o as usize) < hi)
            .filter(|&o| {
                let row = store.row(o as usize);
                mask.columns().all(|c| row[c] == template[c])
            })
            .collect();
        self.stats.candidates += hits.len() as u64;
        hits
    }

    pub fn approx_bytes(&self) -> usize {
        self.buckets.len() * (std::mem::size_of::<u64>() + std::mem::size_of::<Vec<u32>>())
            + self.indexed * std::mem::size_of::<u32>()
    }
}
