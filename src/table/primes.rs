//! Index sizes and the quadratic probe sequence.
//!
//! Every size is a prime `p ≡ 3 (mod 4)`. For such primes the alternating
//! sequence `h, h+1², h-1², h+2², h-2², ...` (mod `p`) visits each of the `p`
//! cells exactly once in its first `p` probes, so a lookup can never skip a
//! cell or revisit one before it has seen the whole table.

/// Successive index sizes, each roughly double the previous one.
pub const TABLE_SIZES: [usize; 28] = [
    7,
    19,
    43,
    103,
    211,
    431,
    863,
    1747,
    3499,
    7019,
    14051,
    28111,
    56239,
    112507,
    225023,
    450067,
    900139,
    1800311,
    3600659,
    7201351,
    14402743,
    28805519,
    57611039,
    115222091,
    230444183,
    460888427,
    921776927,
    1843553863,
];

/// Smallest listed size that is at least `min`; saturates at the largest.
pub fn size_at_least(min: usize) -> usize {
    TABLE_SIZES
        .iter()
        .copied()
        .find(|&size| size >= min)
        .unwrap_or(TABLE_SIZES[TABLE_SIZES.len() - 1])
}

/// The size following `current`, if any.
pub fn next_size(current: usize) -> Option<usize> {
    TABLE_SIZES.iter().copied().find(|&size| size > current)
}

/// Cell visited by probe number `step` for a key hashing to `hash`.
#[inline]
pub fn probe(hash: u64, step: usize, size: usize) -> usize {
    let p = size as u64;
    let home = hash % p;
    if step == 0 {
        return home as usize;
    }
    let j = ((step as u64) + 1) / 2;
    let offset = (j * j) % p;
    let cell = if step % 2 == 1 {
        (home + offset) % p
    } else {
        (home + p - offset) % p
    };
    cell as usize
}

/// Iterator over the full probe sequence of one key.
#[derive(Debug, Clone)]
pub struct ProbeSequence {
    hash: u64,
    size: usize,
    step: usize,
}

impl ProbeSequence {
    pub fn new(hash: u64, size: usize) -> Self {
        ProbeSequence {
            hash,
            size,
            step: 0,
        }
    }
}

impl Iterator for ProbeSequence {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.step >= self.size {
            return None;
        }
        let cell = probe(self.hash, self.step, self.size);
        self.step += 1;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.size - self.step;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers_every_cell(hash: u64, size: usize) -> bool {
        let mut seen = vec![false; size];
        for cell in ProbeSequence::new(hash, size) {
            if seen[cell] {
                return false;
            }
            seen[cell] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn test_sizes_are_primes_congruent_to_three() {
        for &size in &TABLE_SIZES {
            assert_eq!(size % 4, 3, "{size}");
            let mut d = 2;
            while d * d <= size {
                assert_ne!(size % d, 0, "{size} divisible by {d}");
                d += 1;
            }
        }
    }

    #[test]
    fn test_sizes_strictly_increase() {
        for pair in TABLE_SIZES.windows(2) {
            assert!(pair[0] < pair[1], "{} then {}", pair[0], pair[1]);
            assert_eq!(next_size(pair[0]), Some(pair[1]));
            assert_eq!(size_at_least(pair[0] + 1), pair[1]);
        }
    }

    #[test]
    fn test_small_sizes_probe_every_cell() {
        for &size in &TABLE_SIZES[..16] {
            for hash in [0u64, 1, 17, u64::MAX, 0xdead_beef] {
                assert!(covers_every_cell(hash, size), "size {size} hash {hash}");
            }
        }
    }

    #[test]
    fn test_large_sizes_probe_distinct_prefix() {
        // The first probes stay distinct on every size, including ones too
        // large to sweep in full.
        for &size in &TABLE_SIZES {
            let prefix: Vec<usize> = ProbeSequence::new(0xdead_beef, size).take(2_000).collect();
            let distinct: std::collections::HashSet<usize> = prefix.iter().copied().collect();
            assert_eq!(distinct.len(), prefix.len().min(size), "size {size}");
            assert!(prefix.iter().all(|&cell| cell < size));
        }
    }

    #[test]
    fn test_size_selection() {
        assert_eq!(size_at_least(0), 7);
        assert_eq!(size_at_least(8), 19);
        assert_eq!(size_at_least(19), 19);
        assert_eq!(next_size(19), Some(43));
        assert_eq!(next_size(1843553863), None);
    }
}
