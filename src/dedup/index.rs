//! Banded index over perceptual hashes
//!
//! Two hashes within Hamming distance `t` split into `t + 1` disjoint bit
//! bands must agree exactly on at least one band (pigeonhole). Each band keys
//! its own table, so a query only compares against hashes sharing a band
//! value instead of scanning everything.

use crate::dedup::fingerprint::PerceptualHash;
use std::collections::{HashMap, HashSet};

/// One indexed fingerprint and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: PerceptualHash,
    pub source: String,
}

/// A near-duplicate found by a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMatch<'a> {
    pub entry: &'a IndexEntry,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy)]
struct Band {
    shift: u32,
    mask: u64,
}

impl Band {
    fn key(&self, hash: PerceptualHash) -> u64 {
        (hash.0 >> self.shift) & self.mask
    }
}

/// Hamming-distance index of perceptual hashes
#[derive(Debug, Clone)]
pub struct PerceptualIndex {
    threshold: u32,
    bands: Vec<Band>,
    tables: Vec<HashMap<u64, Vec<usize>>>,
    entries: Vec<IndexEntry>,
    known: HashSet<u64>,
}

impl PerceptualIndex {
    /// Creates an index answering "within `threshold` bits" queries
    ///
    /// Thresholds of 64 or more match everything; the index then degrades to
    /// a linear scan.
    pub fn new(threshold: u32) -> Self {
        let bands = if threshold < 64 {
            split_bands(threshold as usize + 1)
        } else {
            Vec::new()
        };

        Self {
            threshold,
            tables: vec![HashMap::new(); bands.len()],
            bands,
            entries: Vec::new(),
            known: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a hash to the index
    ///
    /// Re-inserting a hash that is already present is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if the hash was new
    pub fn insert(&mut self, hash: PerceptualHash, source: impl Into<String>) -> bool {
        if !self.known.insert(hash.0) {
            return false;
        }

        let idx = self.entries.len();
        self.entries.push(IndexEntry {
            hash,
            source: source.into(),
        });

        for (band, table) in self.bands.iter().zip(self.tables.iter_mut()) {
            table.entry(band.key(hash)).or_default().push(idx);
        }
        true
    }

    /// Finds the closest indexed hash within the threshold
    pub fn nearest(&self, hash: PerceptualHash) -> Option<NearMatch<'_>> {
        if self.known.contains(&hash.0) {
            if let Some(entry) = self.entries.iter().find(|e| e.hash == hash) {
                return Some(NearMatch { entry, distance: 0 });
            }
        }

        if self.bands.is_empty() {
            return self.best_of(self.entries.iter(), hash);
        }

        let mut visited = HashSet::new();
        let candidates = self
            .bands
            .iter()
            .zip(self.tables.iter())
            .filter_map(|(band, table)| table.get(&band.key(hash)))
            .flatten()
            .filter(|idx| visited.insert(**idx))
            .map(|idx| &self.entries[*idx]);

        self.best_of(candidates, hash)
    }

    fn best_of<'a>(
        &self,
        candidates: impl Iterator<Item = &'a IndexEntry>,
        hash: PerceptualHash,
    ) -> Option<NearMatch<'a>> {
        candidates
            .filter(|entry| entry.hash.is_similar(&hash, self.threshold))
            .map(|entry| NearMatch {
                entry,
                distance: entry.hash.hamming_distance(&hash),
            })
            .min_by_key(|m| m.distance)
    }
}

/// Splits 64 bits into `count` contiguous bands of near-equal width
fn split_bands(count: usize) -> Vec<Band> {
    let base = 64 / count;
    let extra = 64 % count;
    let mut shift = 0u32;

    (0..count)
        .map(|i| {
            let width = (base + usize::from(i < extra)) as u32;
            let mask = if width >= 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            let band = Band { shift, mask };
            shift += width;
            band
        })
        .collect()
}
