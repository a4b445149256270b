//! 64-bit perceptual fingerprints for near-duplicate detection

use std::fmt;

/// Number of cells the content is summarized into; 64 gradients need 65 cells
const CELLS: usize = 65;

/// A 64-bit perceptual hash; similar inputs differ in few bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits between two hashes
    pub fn hamming_distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Check if two hashes are within `max_distance` bits of each other
    pub fn is_similar(&self, other: &PerceptualHash, max_distance: u32) -> bool {
        self.hamming_distance(other) <= max_distance
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes perceptual fingerprints from raw artifact bytes
///
/// Implementations must be deterministic: the same bytes always give the same
/// hash, across runs, so rehydrated indexes agree with live ones.
pub trait Fingerprinter: Send + Sync {
    /// Returns `None` when the content is too small to fingerprint meaningfully
    fn fingerprint(&self, bytes: &[u8]) -> Option<PerceptualHash>;
}

/// Gradient hash over a coarse summary of the raw bytes
///
/// The content is split into 65 equal cells; bit `i` is set when the mean of
/// cell `i` is lower than the mean of cell `i + 1`. Re-encodings that keep the
/// overall byte distribution (metadata edits, small local changes) flip only
/// the bits of the cells they touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockGradientFingerprinter;

impl Fingerprinter for BlockGradientFingerprinter {
    fn fingerprint(&self, bytes: &[u8]) -> Option<PerceptualHash> {
        if bytes.len() < CELLS {
            return None;
        }

        let len = bytes.len();
        let means: Vec<f64> = (0..CELLS)
            .map(|i| {
                let start = i * len / CELLS;
                let end = (i + 1) * len / CELLS;
                let cell = &bytes[start..end];
                let sum: u64 = cell.iter().map(|&b| b as u64).sum();
                sum as f64 / cell.len() as f64
            })
            .collect();

        Some(PerceptualHash(gradient_bits(&means)))
    }
}

fn gradient_bits(means: &[f64]) -> u64 {
    means
        .windows(2)
        .enumerate()
        .fold(0u64, |hash, (i, pair)| {
            if pair[0] < pair[1] {
                hash | (1 << i)
            } else {
                hash
            }
        })
}
