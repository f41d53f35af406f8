//! Core types for the segment-based fingerprint index

use serde::{Deserialize, Serialize};
use std::fmt;

/// Segment identifier (monotonically increasing per index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Dense document number within a segment (0..doc_count)
///
/// Used internally for posting list storage; mapped to the external
/// molecule id through the doc-number map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocNo(pub u32);

impl DocNo {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// External molecule id, assigned by the upstream encoder.
/// Unique among live documents; never interpreted chemically.
pub type MoleculeId = u32;

/// One molecule as handed to the write path: external id plus the two
/// fingerprints. Bit lists may arrive unsorted and with duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoleculeRecord {
    pub id: MoleculeId,
    pub substructure_bits: Vec<u32>,
    pub similarity_bits: Vec<u32>,
}

/// Posting list metadata stored in the term dictionary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostingListMeta {
    /// Offset in the postings file
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// Number of documents carrying this feature
    pub doc_frequency: u32,
}

/// A similarity score attached to a hit.
///
/// `Ranked` carries a real Tanimoto value in `[0, 1]`. `TimedOut` marks a
/// candidate that was matched but not scored before the query deadline;
/// it never competes numerically with ranked scores. A molecule that is
/// not in the result at all is the third state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HitScore {
    Ranked(f32),
    TimedOut,
}

impl HitScore {
    /// The real score, if this hit was ranked
    pub fn ranked(&self) -> Option<f32> {
        match self {
            HitScore::Ranked(s) => Some(*s),
            HitScore::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, HitScore::TimedOut)
    }
}

/// One similarity search result
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredHit {
    pub id: MoleculeId,
    pub score: HitScore,
}

impl ScoredHit {
    pub fn ranked(id: MoleculeId, score: f32) -> Self {
        Self {
            id,
            score: HitScore::Ranked(score),
        }
    }

    pub fn timed_out(id: MoleculeId) -> Self {
        Self {
            id,
            score: HitScore::TimedOut,
        }
    }
}
