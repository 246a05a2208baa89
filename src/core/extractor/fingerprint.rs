//! Fixed-width perceptual fingerprint and the difference hash that builds it.
//!
//! The difference hash works on a luminance grid of (grid + 1) x grid cells:
//! each cell is compared with its right-hand neighbour and a bit is set when
//! the left cell is brighter. Bits are packed row-major, most significant
//! bit first.

use crate::core::config::FingerprintParams;
use serde::{Deserialize, Serialize};

/// A fixed-length bit vector compared by Hamming distance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    grid_size: u32,
    words: Vec<u64>,
}

impl Fingerprint {
    /// Build from bits in row-major order.
    ///
    /// Missing trailing bits are zero; extra bits are ignored.
    pub fn from_bits<I>(params: FingerprintParams, bits: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let bit_count = params.bit_count() as usize;
        let mut words = vec![0u64; bit_count.div_ceil(64)];
        for (i, bit) in bits.into_iter().take(bit_count).enumerate() {
            if bit {
                words[i / 64] |= 1u64 << (63 - (i % 64));
            }
        }
        Self {
            grid_size: params.grid_size,
            words,
        }
    }

    /// Restore from stored words. Returns None if the length does not fit
    /// the parameters.
    pub fn from_words(params: FingerprintParams, words: Vec<u64>) -> Option<Self> {
        let expected = (params.bit_count() as usize).div_ceil(64);
        (words.len() == expected).then_some(Self {
            grid_size: params.grid_size,
            words,
        })
    }

    /// Parameters this fingerprint was extracted with
    pub fn params(&self) -> FingerprintParams {
        FingerprintParams::new(self.grid_size)
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn bit_count(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    pub fn bit(&self, index: u32) -> bool {
        let i = index as usize;
        (self.words[i / 64] >> (63 - (i % 64))) & 1 == 1
    }

    /// Hamming distance: number of differing bit positions.
    ///
    /// Only meaningful between fingerprints with equal parameters.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        debug_assert_eq!(self.grid_size, other.grid_size);
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Value of the contiguous bit range `[start, start + len)`, `len <= 64`
    pub fn band_value(&self, start: u32, len: u32) -> u64 {
        debug_assert!(len <= 64);
        let end = (start + len).min(self.bit_count());
        (start..end).fold(0u64, |acc, i| (acc << 1) | self.bit(i) as u64)
    }

    pub fn to_hex(&self) -> String {
        self.words.iter().map(|w| format!("{:016x}", w)).collect()
    }
}

/// Difference hash over a row-major luminance grid of
/// `(grid_size + 1) x grid_size` cells.
pub fn difference_hash(params: FingerprintParams, luma: &[u64]) -> Fingerprint {
    let size = params.grid_size as usize;
    let stride = size + 1;
    debug_assert_eq!(luma.len(), stride * size);

    let bits = (0..size).flat_map(move |y| {
        (0..size).map(move |x| luma[y * stride + x] > luma[y * stride + x + 1])
    });
    Fingerprint::from_bits(params, bits)
}
