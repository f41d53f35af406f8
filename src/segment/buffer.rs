//! Mutable buffer for uncommitted writes
//!
//! Records appended through the write path accumulate here until the
//! buffer is flushed into an immutable pending segment. Nothing in the
//! buffer is visible to readers.

use std::collections::HashMap;

use crate::config::BufferConfig;

use super::types::{DocNo, MoleculeId, MoleculeRecord};

/// In-memory buffer of appended molecule records
#[derive(Debug, Default)]
pub struct MutableBuffer {
    /// Substructure feature id -> docnos carrying it
    sub_postings: HashMap<u32, Vec<DocNo>>,
    /// Similarity feature id -> docnos carrying it
    sim_postings: HashMap<u32, Vec<DocNo>>,
    /// docno -> external molecule id
    ids: Vec<MoleculeId>,
    /// docno -> similarity fingerprint cardinality
    sim_sizes: Vec<u32>,
    /// docno -> deleted flag
    deleted: Vec<bool>,
}

impl MutableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record and return its docno.
    ///
    /// Bit lists are deduplicated and sorted here; the stored `simsz` is
    /// the deduplicated similarity cardinality. No id uniqueness check.
    pub fn add(&mut self, record: MoleculeRecord) -> DocNo {
        let docno = DocNo::new(self.ids.len() as u32);

        let sub_bits = dedup_bits(record.substructure_bits);
        let sim_bits = dedup_bits(record.similarity_bits);

        self.ids.push(record.id);
        self.sim_sizes.push(sim_bits.len() as u32);
        self.deleted.push(false);

        for bit in sub_bits {
            self.sub_postings.entry(bit).or_default().push(docno);
        }
        for bit in sim_bits {
            self.sim_postings.entry(bit).or_default().push(docno);
        }

        docno
    }

    /// Mark every live buffered record with this id as deleted.
    /// Returns the number of records marked.
    pub fn delete(&mut self, id: MoleculeId) -> usize {
        let mut marked = 0;
        for (i, &stored) in self.ids.iter().enumerate() {
            if stored == id && !self.deleted[i] {
                self.deleted[i] = true;
                marked += 1;
            }
        }
        marked
    }

    /// Whether the buffer has grown past its flush threshold
    pub fn should_flush(&self, config: &BufferConfig) -> bool {
        self.ids.len() >= config.max_docs
    }

    pub fn doc_count(&self) -> u32 {
        self.ids.len() as u32
    }

    pub fn live_doc_count(&self) -> u32 {
        self.deleted.iter().filter(|&&d| !d).count() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_deleted(&self, docno: DocNo) -> bool {
        self.deleted
            .get(docno.as_usize())
            .copied()
            .unwrap_or(false)
    }

    pub fn sub_postings(&self) -> &HashMap<u32, Vec<DocNo>> {
        &self.sub_postings
    }

    pub fn sim_postings(&self) -> &HashMap<u32, Vec<DocNo>> {
        &self.sim_postings
    }

    pub fn ids(&self) -> &[MoleculeId] {
        &self.ids
    }

    pub fn sim_sizes(&self) -> &[u32] {
        &self.sim_sizes
    }

    pub fn clear(&mut self) {
        self.sub_postings.clear();
        self.sim_postings.clear();
        self.ids.clear();
        self.sim_sizes.clear();
        self.deleted.clear();
    }
}

fn dedup_bits(mut bits: Vec<u32>) -> Vec<u32> {
    bits.sort_unstable();
    bits.dedup();
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: MoleculeId, sub: &[u32], sim: &[u32]) -> MoleculeRecord {
        MoleculeRecord {
            id,
            substructure_bits: sub.to_vec(),
            similarity_bits: sim.to_vec(),
        }
    }

    #[test]
    fn test_add_assigns_dense_docnos() {
        let mut buffer = MutableBuffer::new();
        let d1 = buffer.add(record(100, &[1, 2], &[1, 2, 3]));
        let d2 = buffer.add(record(200, &[2, 3], &[2]));

        assert_eq!(d1, DocNo::new(0));
        assert_eq!(d2, DocNo::new(1));
        assert_eq!(buffer.doc_count(), 2);
        assert_eq!(buffer.sub_postings()[&2], vec![d1, d2]);
        assert_eq!(buffer.sim_sizes(), &[3, 1]);
    }

    #[test]
    fn test_duplicate_bits_counted_once() {
        let mut buffer = MutableBuffer::new();
        buffer.add(record(1, &[5, 5, 5], &[7, 7, 9]));

        assert_eq!(buffer.sub_postings()[&5].len(), 1);
        assert_eq!(buffer.sim_sizes(), &[2]);
    }

    #[test]
    fn test_delete_marks_all_live_matches() {
        let mut buffer = MutableBuffer::new();
        buffer.add(record(1, &[1], &[1]));
        buffer.add(record(2, &[1], &[1]));
        buffer.add(record(1, &[2], &[2]));

        assert_eq!(buffer.delete(1), 2);
        assert_eq!(buffer.live_doc_count(), 1);

        // A re-add after the delete stays live
        buffer.add(record(1, &[3], &[3]));
        assert_eq!(buffer.live_doc_count(), 2);
        assert!(!buffer.is_deleted(DocNo::new(3)));
    }

    #[test]
    fn test_should_flush() {
        let config = BufferConfig { max_docs: 2 };
        let mut buffer = MutableBuffer::new();
        assert!(!buffer.should_flush(&config));
        buffer.add(record(1, &[], &[]));
        buffer.add(record(2, &[], &[]));
        assert!(buffer.should_flush(&config));
    }
}
