//! Primary index: exact-duplicate detection and fully bound probes.
//!
//! Open addressing over a prime-sized `Vec<i32>` of row offsets, `-1`
//! marking an empty cell. The caller owns the rows; the index only stores
//! offsets and asks the caller to compare.

use super::primes::{next_size, size_at_least, ProbeSequence};

pub const EMPTY: i32 = -1;

/// Outcome of [`PrimaryIndex::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A stored row matched; carries its offset.
    Found(u32),
    /// No match; carries the empty cell that terminated the probe.
    Vacant(usize),
}

#[derive(Debug, Clone)]
pub struct PrimaryIndex {
    cells: Vec<i32>,
    len: usize,
}

impl PrimaryIndex {
    pub fn with_capacity(min: usize) -> Self {
        PrimaryIndex {
            cells: vec![EMPTY; size_at_least(min)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Probe for a row hashing to `hash`; `matches(offset)` decides equality.
    pub fn find<F: Fn(u32) -> bool>(&self, hash: u64, matches: F) -> Slot {
        for cell in ProbeSequence::new(hash, self.cells.len()) {
            match self.cells[cell] {
                EMPTY => return Slot::Vacant(cell),
                offset => {
                    if matches(offset as u32) {
                        return Slot::Found(offset as u32);
                    }
                }
            }
        }
        // Unreachable while the load factor stays below one half.
        Slot::Vacant(usize::MAX)
    }

    /// Fill a vacant cell returned by [`find`](Self::find).
    pub fn occupy(&mut self, cell: usize, offset: u32) {
        debug_assert_eq!(self.cells[cell], EMPTY);
        self.cells[cell] = offset as i32;
        self.len += 1;
    }

    /// Whether one more insert would push the load factor past one half.
    pub fn needs_grow(&self) -> bool {
        (self.len + 1) * 2 > self.cells.len() && next_size(self.cells.len()).is_some()
    }

    /// Resize to the next listed prime and replay every `(offset, hash)`.
    pub fn grow<I: IntoIterator<Item = (u32, u64)>>(&mut self, rows: I) {
        let size = next_size(self.cells.len()).unwrap_or(self.cells.len());
        self.rebuild(size, rows);
    }

    fn rebuild<I: IntoIterator<Item = (u32, u64)>>(&mut self, size: usize, rows: I) {
        self.cells = vec![EMPTY; size];
        self.len = 0;
        for (offset, hash) in rows {
            // Offsets are distinct, so the first vacant cell is the home.
            if let Slot::Vacant(cell) = self.find(hash, |_| false) {
                self.occupy(cell, offset);
            }
        }
    }

    pub fn approx_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<i32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_occupy() {
        let mut index = PrimaryIndex::with_capacity(0);
        let keys = [10u64, 17, 24, 31];
        for (offset, &key) in keys.iter().enumerate() {
            match index.find(key, |o| keys[o as usize] == key) {
                Slot::Vacant(cell) => index.occupy(cell, offset as u32),
                Slot::Found(_) => panic!("unexpected duplicate"),
            }
        }
        assert_eq!(index.find(24, |o| keys[o as usize] == 24), Slot::Found(2));
        assert!(matches!(index.find(99, |_| false), Slot::Vacant(_)));
    }

    #[test]
    fn test_grow_keeps_every_offset() {
        let mut index = PrimaryIndex::with_capacity(0);
        let hashes: Vec<u64> = (0..50u64).map(|i| i * 7919).collect();
        for (offset, &hash) in hashes.iter().enumerate() {
            if index.needs_grow() {
                index.grow(hashes[..offset].iter().enumerate().map(|(o, &h)| (o as u32, h)));
            }
            if let Slot::Vacant(cell) = index.find(hash, |_| false) {
                index.occupy(cell, offset as u32);
            }
        }
        assert_eq!(index.len(), 50);
        assert!(index.capacity() > 100);
        for (offset, &hash) in hashes.iter().enumerate() {
            let found = index.find(hash, |o| o as usize == offset);
            assert_eq!(found, Slot::Found(offset as u32));
        }
    }
}
