//! Partition of fingerprint bits into contiguous bands.

use crate::core::extractor::Fingerprint;

/// Contiguous, near-equal bands covering every bit exactly once.
///
/// Band count is `radius + 1`, raised when needed so no band exceeds 64
/// bits and capped at one bit per band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandLayout {
    bit_count: u32,
    radius: u32,
    bands: Vec<(u32, u32)>,
}

impl BandLayout {
    pub fn new(bit_count: u32, radius: u32) -> Self {
        let min_bands = bit_count.div_ceil(64).max(1);
        let count = radius
            .saturating_add(1)
            .max(min_bands)
            .min(bit_count.max(1));

        let base = bit_count / count;
        let extra = bit_count % count;
        let mut bands = Vec::with_capacity(count as usize);
        let mut start = 0;
        for i in 0..count {
            let len = base + u32::from(i < extra);
            bands.push((start, len));
            start += len;
        }

        Self {
            bit_count,
            // Pigeonhole holds for any radius below the band count
            radius: count - 1,
            bands,
        }
    }

    /// Largest distance a banded query answers without falling back
    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    /// `(start, len)` of every band
    pub fn bands(&self) -> &[(u32, u32)] {
        &self.bands
    }

    /// Band values of a fingerprint, in band order
    pub fn values<'a>(&'a self, fingerprint: &'a Fingerprint) -> impl Iterator<Item = u64> + 'a {
        self.bands
            .iter()
            .map(move |&(start, len)| fingerprint.band_value(start, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_cover_every_bit_once() {
        for (bits, radius) in [(64, 0), (64, 4), (64, 63), (256, 5), (1024, 3), (4, 10)] {
            let layout = BandLayout::new(bits, radius);
            let total: u32 = layout.bands().iter().map(|(_, len)| len).sum();
            assert_eq!(total, bits);

            let mut next = 0;
            for &(start, len) in layout.bands() {
                assert_eq!(start, next);
                assert!(len >= 1 && len <= 64);
                next = start + len;
            }
        }
    }

    #[test]
    fn band_count_is_radius_plus_one() {
        let layout = BandLayout::new(64, 5);
        assert_eq!(layout.len(), 6);
        assert_eq!(layout.radius(), 5);
    }

    #[test]
    fn wide_fingerprints_need_more_bands() {
        // 1024 bits cannot fit in 4 bands of 64
        let layout = BandLayout::new(1024, 3);
        assert_eq!(layout.len(), 16);
        assert_eq!(layout.radius(), 15);
    }

    #[test]
    fn radius_is_capped_at_bit_count() {
        let layout = BandLayout::new(4, 10);
        assert_eq!(layout.len(), 4);
        assert_eq!(layout.radius(), 3);
    }
}
