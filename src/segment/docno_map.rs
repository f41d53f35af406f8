//! Dense document number mapping
//!
//! Each segment allocates dense `docno: u32` ordinals in `[0..doc_count)`.
//! The map resolves a docno to its external molecule id and tracks logical
//! deletes in a roaring bitset. Ids are immutable once written; the delete
//! bitset is the only mutable segment artifact and is persisted separately.

use std::io;

use roaring::RoaringBitmap;

use super::postings::{decode_vbyte, encode_vbyte};
use super::types::{DocNo, MoleculeId};

/// Dense docno -> molecule id mapping plus delete bitset
#[derive(Clone, Debug, Default)]
pub struct DocNoMap {
    ids: Vec<MoleculeId>,
    deleted: RoaringBitmap,
}

impl DocNoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            deleted: RoaringBitmap::new(),
        }
    }

    /// Add a new document and return its docno
    pub fn add(&mut self, id: MoleculeId) -> DocNo {
        let docno = DocNo::new(self.ids.len() as u32);
        self.ids.push(id);
        docno
    }

    /// Get the molecule id for a docno
    pub fn molecule_id(&self, docno: DocNo) -> Option<MoleculeId> {
        self.ids.get(docno.as_usize()).copied()
    }

    /// Mark a docno as deleted
    pub fn delete(&mut self, docno: DocNo) {
        self.deleted.insert(docno.as_u32());
    }

    /// Mark every live docno carrying this id as deleted (exact match).
    /// Returns the number of newly deleted docnos.
    pub fn delete_by_id(&mut self, id: MoleculeId) -> usize {
        let mut marked = 0;
        for (i, &stored) in self.ids.iter().enumerate() {
            if stored == id && self.deleted.insert(i as u32) {
                marked += 1;
            }
        }
        marked
    }

    /// Check if a docno is deleted
    pub fn is_deleted(&self, docno: DocNo) -> bool {
        self.deleted.contains(docno.as_u32())
    }

    /// Check if a docno is live (exists and not deleted)
    pub fn is_live(&self, docno: DocNo) -> bool {
        docno.as_usize() < self.ids.len() && !self.deleted.contains(docno.as_u32())
    }

    /// Number of documents (including deleted)
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Number of live documents
    pub fn live_count(&self) -> usize {
        self.ids.len() - self.deleted.len() as usize
    }

    /// Number of deleted documents
    pub fn deleted_count(&self) -> usize {
        self.deleted.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The delete bitset
    pub fn deleted_bitset(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Iterate over live documents
    pub fn live_docs(&self) -> impl Iterator<Item = (DocNo, MoleculeId)> + '_ {
        self.ids
            .iter()
            .enumerate()
            .filter(move |(i, _)| !self.deleted.contains(*i as u32))
            .map(|(i, &id)| (DocNo::new(i as u32), id))
    }

    /// Serialize the immutable id array
    pub fn serialize_ids(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(4 + self.ids.len() * 4);
        encode_vbyte(self.ids.len() as u32, &mut output);
        for &id in &self.ids {
            output.extend_from_slice(&id.to_le_bytes());
        }
        output
    }

    /// Serialize the delete bitset
    pub fn serialize_deletes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.deleted
            .serialize_into(&mut bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(bytes)
    }

    /// Rebuild from the two serialized artifacts
    pub fn deserialize(id_data: &[u8], delete_data: &[u8]) -> io::Result<Self> {
        let mut pos = 0;
        let count = decode_vbyte(id_data, &mut pos)? as usize;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            if pos + 4 > id_data.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Not enough data for docno id entry",
                ));
            }
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&id_data[pos..pos + 4]);
            pos += 4;
            ids.push(MoleculeId::from_le_bytes(bytes));
        }

        let deleted = if delete_data.is_empty() {
            RoaringBitmap::new()
        } else {
            RoaringBitmap::deserialize_from(delete_data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        };

        Ok(Self { ids, deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docno_map_basic() {
        let mut map = DocNoMap::new();

        let d1 = map.add(100);
        let d2 = map.add(200);
        let d3 = map.add(300);

        assert_eq!(d1, DocNo::new(0));
        assert_eq!(d2, DocNo::new(1));
        assert_eq!(d3, DocNo::new(2));

        assert_eq!(map.molecule_id(d1), Some(100));
        assert_eq!(map.molecule_id(d3), Some(300));
        assert_eq!(map.molecule_id(DocNo::new(9)), None);

        assert_eq!(map.len(), 3);
        assert_eq!(map.live_count(), 3);
    }

    #[test]
    fn test_docno_map_delete() {
        let mut map = DocNoMap::new();

        map.add(100);
        let d2 = map.add(200);
        map.add(300);

        assert!(map.is_live(d2));
        map.delete(d2);

        assert!(map.is_deleted(d2));
        assert!(!map.is_live(d2));
        assert_eq!(map.len(), 3);
        assert_eq!(map.live_count(), 2);
        assert_eq!(map.deleted_count(), 1);
    }

    #[test]
    fn test_delete_by_id_marks_all_occurrences() {
        let mut map = DocNoMap::new();
        map.add(100);
        map.add(200);
        map.add(100); // duplicate id from a re-add
        map.add(300);

        assert_eq!(map.delete_by_id(100), 2);
        assert_eq!(map.live_count(), 2);
        // Deleting again finds nothing new
        assert_eq!(map.delete_by_id(100), 0);
        assert_eq!(map.delete_by_id(999), 0);
    }

    #[test]
    fn test_docno_map_serialization() {
        let mut map = DocNoMap::new();
        map.add(100);
        map.add(200);
        let d3 = map.add(300);
        map.delete(d3);

        let ids = map.serialize_ids();
        let deletes = map.serialize_deletes().unwrap();
        let restored = DocNoMap::deserialize(&ids, &deletes).unwrap();

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.molecule_id(DocNo::new(0)), Some(100));
        assert_eq!(restored.molecule_id(DocNo::new(1)), Some(200));
        assert!(restored.is_deleted(DocNo::new(2)));
    }

    #[test]
    fn test_deserialize_with_empty_delete_file() {
        let mut map = DocNoMap::new();
        map.add(5);
        let restored = DocNoMap::deserialize(&map.serialize_ids(), &[]).unwrap();
        assert_eq!(restored.deleted_count(), 0);
        assert_eq!(restored.live_count(), 1);
    }

    #[test]
    fn test_live_docs_iterator() {
        let mut map = DocNoMap::new();
        map.add(10);
        let d2 = map.add(20);
        map.add(30);
        map.delete(d2);

        let live: Vec<_> = map.live_docs().collect();
        assert_eq!(live, vec![(DocNo::new(0), 10), (DocNo::new(2), 30)]);
    }
}
