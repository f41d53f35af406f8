//! Segment manifest for tracking live segments
//!
//! The manifest is the atomic publish point of the index:
//! 1. Write new segment files
//! 2. Write segments.manifest.tmp
//! 3. Atomic rename to segments.manifest
//!
//! Readers that loaded an older manifest keep their segment readers; the
//! files they reference are fully loaded at open, so replacement never
//! invalidates an existing view.

use std::io;

use serde::{Deserialize, Serialize};

use crate::term::TermEncoding;

use super::reader::SegmentMeta;
use super::types::SegmentId;

/// Manifest entry for a segment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Segment metadata
    pub meta: SegmentMeta,
    /// Checksum over the segment's immutable artifacts
    pub checksum: u64,
}

/// The segment manifest tracks all live segments
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Manifest format version
    pub version: u32,
    /// Generation number (incremented on each publish)
    pub generation: u64,
    /// Next segment ID to allocate
    pub next_segment_id: SegmentId,
    /// Term encoding all segments in this index use
    pub encoding: TermEncoding,
    /// Live segments
    pub segments: Vec<ManifestEntry>,
    /// Timestamp of last update
    pub updated_at: u64,
}

impl SegmentManifest {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// Create a new empty manifest
    pub fn new(encoding: TermEncoding) -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: SegmentId::new(0),
            encoding,
            segments: Vec::new(),
            updated_at: 0,
        }
    }

    /// Allocate a new segment ID
    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    /// Add a new segment to the manifest
    pub fn add_segment(&mut self, meta: SegmentMeta, checksum: u64) {
        self.segments.push(ManifestEntry { meta, checksum });
        self.touch();
    }

    /// Remove a segment from the manifest (after a merge)
    pub fn remove_segment(&mut self, segment_id: SegmentId) -> Option<ManifestEntry> {
        if let Some(pos) = self.segments.iter().position(|e| e.meta.id == segment_id) {
            self.touch();
            Some(self.segments.remove(pos))
        } else {
            None
        }
    }

    /// Get segment entry by ID
    pub fn get_segment(&self, segment_id: SegmentId) -> Option<&ManifestEntry> {
        self.segments.iter().find(|e| e.meta.id == segment_id)
    }

    pub fn get_segment_mut(&mut self, segment_id: SegmentId) -> Option<&mut ManifestEntry> {
        self.segments.iter_mut().find(|e| e.meta.id == segment_id)
    }

    /// Total document count across all segments (including deleted)
    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|e| e.meta.doc_count as u64).sum()
    }

    /// Total live document count across all segments
    pub fn total_live_doc_count(&self) -> u64 {
        self.segments
            .iter()
            .map(|e| e.meta.live_doc_count as u64)
            .sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.segments.iter()
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = current_timestamp();
    }

    /// Serialize the manifest to bincode
    pub fn to_bincode(&self) -> io::Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Deserialize manifest from bincode
    pub fn from_bincode(data: &[u8]) -> io::Result<Self> {
        bincode::deserialize(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Serialize the manifest to JSON (debug dumps)
    pub fn to_json(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Get current Unix timestamp in seconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
