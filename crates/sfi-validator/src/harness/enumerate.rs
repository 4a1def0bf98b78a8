//! Byte pattern enumerators feeding cross-check trials.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Every value of the first `width` bytes after a fixed lead, followed by a
/// fixed tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExhaustiveEnumerator {
    lead: Vec<u8>,
    width: u8,
    tail: Vec<u8>,
}

impl ExhaustiveEnumerator {
    /// Widest enumerated prefix in bytes.
    pub const MAX_WIDTH: u8 = 3;

    /// Enumerates `width` bytes (clamped to `1..=3`) followed by `tail`.
    #[must_use]
    pub fn new(width: u8, tail: Vec<u8>) -> Self {
        Self {
            lead: Vec::new(),
            width: width.clamp(1, Self::MAX_WIDTH),
            tail,
        }
    }

    /// Returns a copy that puts `lead` before every enumerated value, e.g.
    /// `[0x0F]` to walk the two-byte opcode map.
    #[must_use]
    pub fn with_lead(mut self, lead: Vec<u8>) -> Self {
        self.lead = lead;
        self
    }

    /// Number of patterns produced.
    #[must_use]
    pub fn len(&self) -> usize {
        1usize << (8 * u32::from(self.width))
    }

    /// Always false; the smallest enumeration has 256 patterns.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Patterns in ascending order of the enumerated bytes.
    pub fn patterns(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        let width = usize::from(self.width);
        (0..self.len()).map(move |value| {
            let mut bytes = Vec::with_capacity(self.lead.len() + width + self.tail.len());
            bytes.extend_from_slice(&self.lead);
            bytes.extend_from_slice(&value.to_be_bytes()[std::mem::size_of::<usize>() - width..]);
            bytes.extend_from_slice(&self.tail);
            bytes
        })
    }
}

/// Seeded pseudo-random patterns of a fixed length.
///
/// The same seed always yields the same sequence.
#[derive(Debug, Clone)]
pub struct RandomEnumerator {
    rng: ChaCha20Rng,
    length: usize,
}

impl RandomEnumerator {
    /// Patterns of `length` bytes drawn from a generator seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64, length: usize) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            length,
        }
    }
}

impl Iterator for RandomEnumerator {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = vec![0u8; self.length];
        self.rng.fill_bytes(&mut bytes);
        Some(bytes)
    }
}
