//! Persistent storage for segment files and the manifest
//!
//! Directory layout:
//!
//! ```text
//! <index>/segments.manifest
//! <index>/segment_<n>/subfp.post   subfp.fst   subfp.meta
//!                     simfp.post   simfp.fst   simfp.meta
//!                     docno_map.bin  deleted.bin  docvalues.bin
//! ```
//!
//! The manifest is published with a tmp-write plus atomic rename so a
//! reader never observes a half-written manifest.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::error::{MolScreenError, Result};

use super::docno_map::DocNoMap;
use super::docvalues::DocValuesReader;
use super::manifest::{ManifestEntry, SegmentManifest};
use super::reader::SegmentReader;
use super::types::{PostingListMeta, SegmentId};
use super::writer::{field_from_artifacts, SegmentWriteResult};

const MANIFEST_FILE: &str = "segments.manifest";
const MANIFEST_TMP_FILE: &str = "segments.manifest.tmp";

const SEGMENT_FILES: &[&str] = &[
    "subfp.post",
    "subfp.fst",
    "subfp.meta",
    "simfp.post",
    "simfp.fst",
    "simfp.meta",
    "docno_map.bin",
    "deleted.bin",
    "docvalues.bin",
];

/// Persistent storage rooted at one index directory
#[derive(Debug)]
pub struct SegmentStore {
    base_dir: PathBuf,
}

impl SegmentStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        })
    }

    /// Open an existing index directory without creating it
    pub fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.is_dir() {
            return Err(MolScreenError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("index directory {} does not exist", base_dir.display()),
            )));
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn segment_dir(&self, id: SegmentId) -> PathBuf {
        self.base_dir.join(id.to_string())
    }

    /// Write all artifacts of a freshly built segment
    pub fn write_segment(&self, result: &SegmentWriteResult) -> Result<()> {
        let dir = self.segment_dir(result.reader.id());
        fs::create_dir_all(&dir)?;

        fs::write(dir.join("subfp.post"), &result.sub.postings)?;
        fs::write(dir.join("subfp.fst"), &result.sub.fst)?;
        fs::write(dir.join("subfp.meta"), bincode::serialize(&result.sub.meta)?)?;
        fs::write(dir.join("simfp.post"), &result.sim.postings)?;
        fs::write(dir.join("simfp.fst"), &result.sim.fst)?;
        fs::write(dir.join("simfp.meta"), bincode::serialize(&result.sim.meta)?)?;
        fs::write(dir.join("docno_map.bin"), &result.docno_ids)?;
        fs::write(dir.join("deleted.bin"), &result.deletes)?;
        fs::write(dir.join("docvalues.bin"), &result.docvalues)?;
        Ok(())
    }

    /// Load a segment, verifying its checksum against the manifest entry
    pub fn read_segment(&self, entry: &ManifestEntry) -> Result<Arc<SegmentReader>> {
        let dir = self.segment_dir(entry.meta.id);

        let sub_postings = fs::read(dir.join("subfp.post"))?;
        let sub_fst = fs::read(dir.join("subfp.fst"))?;
        let sub_meta: Vec<PostingListMeta> = bincode::deserialize(&fs::read(dir.join("subfp.meta"))?)?;
        let sim_postings = fs::read(dir.join("simfp.post"))?;
        let sim_fst = fs::read(dir.join("simfp.fst"))?;
        let sim_meta: Vec<PostingListMeta> = bincode::deserialize(&fs::read(dir.join("simfp.meta"))?)?;
        let docno_ids = fs::read(dir.join("docno_map.bin"))?;
        let deletes = fs::read(dir.join("deleted.bin"))?;
        let docvalues_data = fs::read(dir.join("docvalues.bin"))?;

        let actual = segment_checksum(
            &sub_postings,
            &sub_fst,
            &sub_meta,
            &sim_postings,
            &sim_fst,
            &sim_meta,
            &docno_ids,
            &docvalues_data,
        );
        if actual != entry.checksum {
            tracing::warn!(
                segment = %entry.meta.id,
                expected = entry.checksum,
                actual,
                "segment checksum mismatch"
            );
            return Err(MolScreenError::Corruption(format!(
                "checksum mismatch for {}: manifest {}, files {}",
                entry.meta.id, entry.checksum, actual
            )));
        }

        let sub = field_from_artifacts(sub_postings, sub_fst, sub_meta)?;
        let sim = field_from_artifacts(sim_postings, sim_fst, sim_meta)?;
        let docno_map = DocNoMap::deserialize(&docno_ids, &deletes)?;
        let docvalues = DocValuesReader::deserialize(&docvalues_data)?;

        Ok(Arc::new(SegmentReader::from_parts(
            entry.meta.clone(),
            sub,
            sim,
            docno_map,
            docvalues,
        )))
    }

    /// Load only a segment's doc-number map (write path: delete application)
    pub fn load_docno_map(&self, id: SegmentId) -> Result<DocNoMap> {
        let dir = self.segment_dir(id);
        let ids = fs::read(dir.join("docno_map.bin"))?;
        let deletes = fs::read(dir.join("deleted.bin"))?;
        Ok(DocNoMap::deserialize(&ids, &deletes)?)
    }

    /// Rewrite a segment's delete bitset
    pub fn write_deletes(&self, id: SegmentId, deleted: &RoaringBitmap) -> Result<()> {
        let mut bytes = Vec::new();
        deleted
            .serialize_into(&mut bytes)
            .map_err(|e| MolScreenError::Corruption(format!("delete bitset: {}", e)))?;
        fs::write(self.segment_dir(id).join("deleted.bin"), bytes)?;
        Ok(())
    }

    /// Copy a foreign segment's files verbatim under a new local id
    pub fn copy_segment(&self, from: &SegmentStore, src: SegmentId, dst: SegmentId) -> Result<()> {
        let src_dir = from.segment_dir(src);
        let dst_dir = self.segment_dir(dst);
        fs::create_dir_all(&dst_dir)?;
        for file in SEGMENT_FILES {
            fs::copy(src_dir.join(file), dst_dir.join(file))?;
        }
        Ok(())
    }

    /// Remove a segment directory and everything in it
    pub fn remove_segment(&self, id: SegmentId) -> Result<()> {
        let dir = self.segment_dir(id);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Publish a manifest atomically (tmp write + rename)
    pub fn save_manifest(&self, manifest: &SegmentManifest) -> Result<()> {
        let tmp = self.base_dir.join(MANIFEST_TMP_FILE);
        fs::write(&tmp, manifest.to_bincode()?)?;
        fs::rename(&tmp, self.base_dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<SegmentManifest> {
        let bytes = fs::read(self.base_dir.join(MANIFEST_FILE))?;
        Ok(SegmentManifest::from_bincode(&bytes)?)
    }

    pub fn manifest_exists(&self) -> bool {
        self.base_dir.join(MANIFEST_FILE).is_file()
    }
}

/// Checksum over a segment's immutable artifacts, matching
/// `SegmentWriteResult::checksum`
#[allow(clippy::too_many_arguments)]
fn segment_checksum(
    sub_postings: &[u8],
    sub_fst: &[u8],
    sub_meta: &[PostingListMeta],
    sim_postings: &[u8],
    sim_fst: &[u8],
    sim_meta: &[PostingListMeta],
    docno_ids: &[u8],
    docvalues: &[u8],
) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(sub_postings);
    hasher.update(sub_fst);
    hasher.update(&bincode::serialize(sub_meta).unwrap_or_default());
    hasher.update(sim_postings);
    hasher.update(sim_fst);
    hasher.update(&bincode::serialize(sim_meta).unwrap_or_default());
    hasher.update(docno_ids);
    hasher.update(docvalues);
    hasher.finalize() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::buffer::MutableBuffer;
    use crate::segment::types::{DocNo, MoleculeRecord};
    use crate::segment::writer::SegmentWriter;
    use crate::term::TermEncoding;
    use tempfile::TempDir;

    fn write_test_segment(store: &SegmentStore, id: u64) -> (ManifestEntry, SegmentWriteResult) {
        let mut buffer = MutableBuffer::new();
        buffer.add(MoleculeRecord {
            id: 100,
            substructure_bits: vec![1, 2],
            similarity_bits: vec![1, 2, 3],
        });
        buffer.add(MoleculeRecord {
            id: 200,
            substructure_bits: vec![2],
            similarity_bits: vec![2],
        });
        let result = SegmentWriter::new(SegmentId::new(id), TermEncoding::Text)
            .write_from_buffer(&buffer)
            .unwrap();
        store.write_segment(&result).unwrap();
        let entry = ManifestEntry {
            meta: result.reader.meta().clone(),
            checksum: result.checksum(),
        };
        (entry, result)
    }

    #[test]
    fn test_segment_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let (entry, _) = write_test_segment(&store, 0);

        let reader = store.read_segment(&entry).unwrap();
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.molecule_id(DocNo::new(0)), Some(100));
        assert_eq!(reader.sim_size(DocNo::new(0)), Some(3));

        let enc = TermEncoding::Text;
        let docnos: Vec<_> = reader
            .sub()
            .postings(&enc.encode(2))
            .unwrap()
            .unwrap()
            .collect();
        assert_eq!(docnos, vec![DocNo::new(0), DocNo::new(1)]);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let (mut entry, _) = write_test_segment(&store, 0);
        entry.checksum ^= 1;

        let err = store.read_segment(&entry).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_delete_rewrite_keeps_checksum_valid() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let (entry, _) = write_test_segment(&store, 0);

        let mut map = store.load_docno_map(entry.meta.id).unwrap();
        map.delete_by_id(100);
        store
            .write_deletes(entry.meta.id, map.deleted_bitset())
            .unwrap();

        // Deletes are excluded from the checksum, so the segment still opens
        let reader = store.read_segment(&entry).unwrap();
        assert_eq!(reader.live_doc_count(), 1);
        assert!(reader.is_deleted(DocNo::new(0)));
    }

    #[test]
    fn test_manifest_save_load() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        assert!(!store.manifest_exists());

        let mut manifest = SegmentManifest::new(TermEncoding::Points);
        manifest.allocate_segment_id();
        store.save_manifest(&manifest).unwrap();
        assert!(store.manifest_exists());

        let loaded = store.load_manifest().unwrap();
        assert_eq!(loaded.encoding, TermEncoding::Points);
        assert_eq!(loaded.next_segment_id, SegmentId::new(1));
    }

    #[test]
    fn test_copy_segment_between_stores() {
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();
        let store_a = SegmentStore::new(tmp_a.path()).unwrap();
        let store_b = SegmentStore::new(tmp_b.path()).unwrap();

        let (entry, _) = write_test_segment(&store_a, 3);
        store_b
            .copy_segment(&store_a, SegmentId::new(3), SegmentId::new(7))
            .unwrap();

        let mut copied_entry = entry.clone();
        copied_entry.meta.id = SegmentId::new(7);
        let reader = store_b.read_segment(&copied_entry).unwrap();
        assert_eq!(reader.doc_count(), 2);
    }

    #[test]
    fn test_remove_segment() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let (entry, _) = write_test_segment(&store, 0);

        store.remove_segment(entry.meta.id).unwrap();
        assert!(store.read_segment(&entry).is_err());
        // Removing again is a no-op
        store.remove_segment(entry.meta.id).unwrap();
    }
}
