//! Write path: a single-writer batch session over one index directory
//!
//! Exactly one `Indexer` may be open per path, enforced by an exclusive
//! lock file. Appended records accumulate in a mutable buffer and flush
//! into *pending* segments; nothing becomes visible to readers until
//! `commit` publishes a new manifest. Merges selected by the balancer run
//! synchronously on the calling thread.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::IndexSettings;
use crate::error::{MolScreenError, Result};
use crate::segment::{
    ManifestEntry, MergeGroup, MoleculeId, MoleculeRecord, MutableBuffer, SegmentId,
    SegmentManifest, SegmentMergeBalancer, SegmentReader, SegmentStore, SegmentWeight,
    SegmentWriter,
};

const LOCK_FILE: &str = "write.lock";

/// Exclusive writer lock, released on drop on every exit path
#[derive(Debug)]
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(MolScreenError::WriterLocked(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A write session. Ended by exactly one of `commit` or `rollback`; ending
/// it any other way is a programming error (the lock is still released,
/// but pending segment files are left behind as orphans).
#[derive(Debug)]
pub struct Indexer {
    store: SegmentStore,
    manifest: SegmentManifest,
    settings: IndexSettings,
    balancer: SegmentMergeBalancer,
    buffer: MutableBuffer,
    /// Flushed but unpublished segments
    pending: Vec<ManifestEntry>,
    /// Deletes recorded against already-committed segments, applied at commit
    deferred_deletes: Vec<MoleculeId>,
    /// Committed segments merged away this session; their files are only
    /// removed after the new manifest is published
    retired_committed: Vec<SegmentId>,
    _lock: WriterLock,
    finished: bool,
}

impl Indexer {
    /// Open a writable index at `path`, creating it if absent.
    ///
    /// The lock is the first resource acquired; every later failure drops
    /// it before propagating, so a failed open never leaks the lock.
    pub fn begin<P: AsRef<Path>>(path: P, settings: IndexSettings) -> Result<Self> {
        let store = SegmentStore::new(&path)?;
        let lock = WriterLock::acquire(store.base_dir())?;

        let manifest = if store.manifest_exists() {
            let manifest = store.load_manifest()?;
            if manifest.encoding != settings.encoding {
                return Err(MolScreenError::EncodingMismatch {
                    index: manifest.encoding,
                    requested: settings.encoding,
                });
            }
            manifest
        } else {
            SegmentManifest::new(settings.encoding)
        };

        tracing::info!(
            path = %store.base_dir().display(),
            segments = manifest.segment_count(),
            "opened writable index"
        );

        let balancer = SegmentMergeBalancer::new(settings.balancer.clone());
        Ok(Self {
            store,
            manifest,
            settings,
            balancer,
            buffer: MutableBuffer::new(),
            pending: Vec::new(),
            deferred_deletes: Vec::new(),
            retired_committed: Vec::new(),
            _lock: lock,
            finished: false,
        })
    }

    /// Append one molecule record. Duplicate ids are the caller's
    /// responsibility; nothing is checked here. Visible only after commit.
    pub fn add(
        &mut self,
        id: MoleculeId,
        substructure_bits: Vec<u32>,
        similarity_bits: Vec<u32>,
    ) -> Result<()> {
        self.buffer.add(MoleculeRecord {
            id,
            substructure_bits,
            similarity_bits,
        });
        if self.buffer.should_flush(&self.settings.buffer) {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Import all segments of another on-disk index verbatim (file-level
    /// copy, no re-encoding) as pending segments.
    pub fn add_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let other_store = SegmentStore::open(&path)?;
        let other_manifest = other_store.load_manifest()?;

        if other_manifest.encoding != self.manifest.encoding {
            return Err(MolScreenError::EncodingMismatch {
                index: self.manifest.encoding,
                requested: other_manifest.encoding,
            });
        }

        for entry in other_manifest.iter() {
            let new_id = self.manifest.allocate_segment_id();
            self.store.copy_segment(&other_store, entry.meta.id, new_id)?;
            let mut meta = entry.meta.clone();
            meta.id = new_id;
            self.pending.push(ManifestEntry {
                meta,
                checksum: entry.checksum,
            });
        }

        tracing::info!(
            from = %path.as_ref().display(),
            segments = other_manifest.segment_count(),
            "imported foreign index"
        );
        Ok(())
    }

    /// Logically delete every live record with this id. Buffered and
    /// pending records are marked immediately; committed segments are
    /// marked during commit so rollback leaves them untouched.
    pub fn delete(&mut self, id: MoleculeId) -> Result<()> {
        self.buffer.delete(id);

        for entry in &mut self.pending {
            let mut map = self.store.load_docno_map(entry.meta.id)?;
            if map.delete_by_id(id) > 0 {
                self.store.write_deletes(entry.meta.id, map.deleted_bitset())?;
                entry.meta.live_doc_count = map.live_count() as u32;
            }
        }

        self.deferred_deletes.push(id);
        Ok(())
    }

    /// Force-merge everything into a single segment
    pub fn optimize(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.apply_deferred_deletes()?;

        let all_ids: Vec<SegmentId> = self
            .manifest
            .iter()
            .map(|e| e.meta.id)
            .chain(self.pending.iter().map(|e| e.meta.id))
            .collect();
        if all_ids.len() < 2 {
            return Ok(());
        }

        tracing::info!(segments = all_ids.len(), "optimizing into one segment");
        let group = MergeGroup {
            segment_ids: all_ids,
            weight: 0,
        };
        self.execute_merge(&group)?;
        Ok(())
    }

    /// Self-merge every segment carrying deletions, reclaiming their space
    pub fn purge_deletes(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.apply_deferred_deletes()?;
        let weights = self.segment_weights();
        for group in self.balancer.forced_delete_merges(&weights) {
            self.execute_merge(&group)?;
        }
        Ok(())
    }

    /// Flush the buffer, apply deferred deletes, run the balancer's merges
    /// synchronously, and atomically publish the new manifest. Releases
    /// the writer lock on both the success and the error path.
    pub fn commit(mut self) -> Result<()> {
        let result = self.commit_inner();
        self.finished = true;
        // Lock released by drop
        result
    }

    /// Discard everything this session wrote and release the writer lock
    pub fn rollback(mut self) -> Result<()> {
        let result = self.rollback_inner();
        self.finished = true;
        result
    }

    /// Number of records sitting in the buffer, not yet flushed
    pub fn buffered_docs(&self) -> u32 {
        self.buffer.doc_count()
    }

    /// Number of flushed-but-unpublished segments
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    fn commit_inner(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.apply_deferred_deletes()?;

        // Balance segment counts; merges run on this thread
        let weights = self.segment_weights();
        let groups = self.balancer.find_merges(&weights);
        for group in groups {
            self.execute_merge(&group)?;
        }

        // Publish: move pending entries into the manifest, then the
        // atomic manifest rename makes everything visible at once
        for entry in self.pending.drain(..) {
            self.manifest.add_segment(entry.meta, entry.checksum);
        }
        self.store.save_manifest(&self.manifest)?;

        // Only now is it safe to drop merged-away committed segments: any
        // reader that raced the publish loaded them fully into memory
        for segment_id in self.retired_committed.drain(..) {
            self.store.remove_segment(segment_id)?;
        }

        tracing::info!(
            segments = self.manifest.segment_count(),
            live_docs = self.manifest.total_live_doc_count(),
            generation = self.manifest.generation,
            "committed index"
        );
        Ok(())
    }

    fn rollback_inner(&mut self) -> Result<()> {
        for entry in self.pending.drain(..) {
            self.store.remove_segment(entry.meta.id)?;
        }
        self.buffer.clear();
        self.deferred_deletes.clear();
        // Merged-away committed segments keep their files; the published
        // manifest still references them
        self.retired_committed.clear();
        tracing::info!(path = %self.store.base_dir().display(), "rolled back write session");
        Ok(())
    }

    /// Write the buffer out as one pending segment
    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() || self.buffer.live_doc_count() == 0 {
            self.buffer.clear();
            return Ok(());
        }

        let segment_id = self.manifest.allocate_segment_id();
        let writer = SegmentWriter::new(segment_id, self.manifest.encoding);
        let result = writer.write_from_buffer(&self.buffer)?;
        let checksum = result.checksum();
        self.store.write_segment(&result)?;

        tracing::debug!(
            segment = %segment_id,
            docs = result.reader.doc_count(),
            "flushed buffer to pending segment"
        );

        self.pending.push(ManifestEntry {
            meta: result.reader.meta().clone(),
            checksum,
        });
        self.buffer.clear();
        Ok(())
    }

    /// Mark deferred deletes in committed segments' delete bitsets
    fn apply_deferred_deletes(&mut self) -> Result<()> {
        if self.deferred_deletes.is_empty() {
            return Ok(());
        }
        let ids = std::mem::take(&mut self.deferred_deletes);

        let committed: Vec<SegmentId> = self.manifest.iter().map(|e| e.meta.id).collect();
        for segment_id in committed {
            let mut map = self.store.load_docno_map(segment_id)?;
            let mut marked = 0;
            for &id in &ids {
                marked += map.delete_by_id(id);
            }
            if marked > 0 {
                self.store.write_deletes(segment_id, map.deleted_bitset())?;
                if let Some(entry) = self.manifest.get_segment_mut(segment_id) {
                    entry.meta.live_doc_count = map.live_count() as u32;
                }
                tracing::debug!(segment = %segment_id, marked, "applied deletes");
            }
        }
        Ok(())
    }

    fn segment_weights(&self) -> Vec<SegmentWeight> {
        self.manifest
            .iter()
            .chain(self.pending.iter())
            .map(|e| SegmentWeight {
                id: e.meta.id,
                live_docs: e.meta.live_doc_count as u64,
                deleted_docs: e.meta.deleted_count() as u64,
            })
            .collect()
    }

    /// Merge one group into a new pending segment and drop its inputs
    fn execute_merge(&mut self, group: &MergeGroup) -> Result<()> {
        let mut readers: Vec<std::sync::Arc<SegmentReader>> = Vec::new();
        for &segment_id in &group.segment_ids {
            readers.push(self.open_segment(segment_id)?);
        }
        let reader_refs: Vec<&SegmentReader> = readers.iter().map(|r| r.as_ref()).collect();

        let output_id = self.manifest.allocate_segment_id();
        let writer = SegmentWriter::new(output_id, self.manifest.encoding);
        let result = writer.merge_segments(&reader_refs)?;
        let checksum = result.checksum();
        self.store.write_segment(&result)?;

        tracing::info!(
            inputs = group.segment_ids.len(),
            output = %output_id,
            docs = result.reader.doc_count(),
            "merged segments"
        );

        // Retire the inputs: unpublished inputs can be removed from disk
        // right away, committed ones only leave the manifest now and lose
        // their files after the new manifest is published
        for &segment_id in &group.segment_ids {
            if let Some(pos) = self.pending.iter().position(|e| e.meta.id == segment_id) {
                self.pending.remove(pos);
                self.store.remove_segment(segment_id)?;
            } else if self.manifest.remove_segment(segment_id).is_some() {
                self.retired_committed.push(segment_id);
            }
        }

        self.pending.push(ManifestEntry {
            meta: result.reader.meta().clone(),
            checksum,
        });
        Ok(())
    }

    fn open_segment(&self, segment_id: SegmentId) -> Result<std::sync::Arc<SegmentReader>> {
        let entry = self
            .manifest
            .get_segment(segment_id)
            .or_else(|| self.pending.iter().find(|e| e.meta.id == segment_id))
            .ok_or_else(|| {
                MolScreenError::Corruption(format!("unknown segment {}", segment_id))
            })?;
        self.store.read_segment(entry)
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                path = %self.store.base_dir().display(),
                "indexer dropped without commit or rollback"
            );
        }
    }
}
