//! Read path: consistent views over a published index, hot-swapped on
//! replacement
//!
//! A `SearchSession` holds exactly one immutable [`SearchView`] behind an
//! atomic swap. Queries grab the current view once and keep it for their
//! whole run, so a reload never invalidates in-flight work; the old
//! view's resources free when its last reference drops. A background
//! watcher thread polls for deletion of the open path (the signal that a
//! replacement index was published elsewhere) and closes the view it was
//! started for, never a newer one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::channel::{bounded, Sender};
use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::config::LookupCacheMode;
use crate::error::{MolScreenError, Result};
use crate::search::{merge_chunks, BoundedTopK, ChunkedHits, SortedHits, UnsortedHits};
use crate::search::{tanimoto, ConjunctiveQuery, DisjunctiveQuery};
use crate::segment::{DocNo, MoleculeId, ScoredHit, SegmentReader, SegmentStore};
use crate::term::TermEncoding;

/// How often the reload watcher polls the open path
const WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// How many hits a chunked worker packs per chunk
const MATCH_CHUNK_SIZE: usize = 1024;

/// Per-segment id/size lookup tables
enum IdLookup {
    /// Decode from the segment on every access
    Disabled,
    /// Filled by one scan at view open
    Eager {
        ids: Vec<MoleculeId>,
        sizes: Vec<u32>,
    },
    /// Empty slots are the sentinel; each fills on first access
    Lazy {
        slots: Vec<OnceLock<(MoleculeId, u32)>>,
    },
}

impl IdLookup {
    fn build(mode: LookupCacheMode, reader: &SegmentReader) -> Self {
        match mode {
            LookupCacheMode::Disabled => IdLookup::Disabled,
            LookupCacheMode::Eager => {
                let doc_count = reader.doc_count() as usize;
                let mut ids = Vec::with_capacity(doc_count);
                let mut sizes = Vec::with_capacity(doc_count);
                for docno in 0..doc_count as u32 {
                    let docno = DocNo::new(docno);
                    ids.push(reader.molecule_id(docno).unwrap_or(MoleculeId::MAX));
                    sizes.push(reader.sim_size(docno).unwrap_or(0));
                }
                IdLookup::Eager { ids, sizes }
            }
            LookupCacheMode::Lazy => {
                let mut slots = Vec::new();
                slots.resize_with(reader.doc_count() as usize, OnceLock::new);
                IdLookup::Lazy { slots }
            }
        }
    }

    fn get(&self, reader: &SegmentReader, docno: DocNo) -> Option<(MoleculeId, u32)> {
        match self {
            IdLookup::Disabled => {
                Some((reader.molecule_id(docno)?, reader.sim_size(docno)?))
            }
            IdLookup::Eager { ids, sizes } => {
                let i = docno.as_usize();
                Some((*ids.get(i)?, *sizes.get(i)?))
            }
            IdLookup::Lazy { slots } => {
                let slot = slots.get(docno.as_usize())?;
                Some(*slot.get_or_init(|| {
                    (
                        reader.molecule_id(docno).unwrap_or(MoleculeId::MAX),
                        reader.sim_size(docno).unwrap_or(0),
                    )
                }))
            }
        }
    }
}

/// An immutable, consistent snapshot of one published index
pub struct SearchView {
    path: PathBuf,
    encoding: TermEncoding,
    generation: u64,
    segments: Vec<Arc<SegmentReader>>,
    lookups: Vec<IdLookup>,
    total_live_docs: u64,
}

impl SearchView {
    fn open(path: &Path, cache_mode: LookupCacheMode) -> Result<Self> {
        let store = SegmentStore::open(path)?;
        let manifest = store.load_manifest()?;

        let mut segments = Vec::with_capacity(manifest.segment_count());
        for entry in manifest.iter() {
            let reader = store.read_segment(entry)?;
            let docs = reader.doc_count() as usize;
            if reader.docno_map().len() != docs || reader.docvalues().len() != docs {
                return Err(MolScreenError::Corruption(format!(
                    "segment {} stored tables disagree with doc count {}",
                    entry.meta.id, docs
                )));
            }
            segments.push(reader);
        }

        let lookups = segments
            .iter()
            .map(|s| IdLookup::build(cache_mode, s))
            .collect();
        let total_live_docs = segments.iter().map(|s| s.live_doc_count() as u64).sum();

        tracing::info!(
            path = %path.display(),
            segments = segments.len(),
            live_docs = total_live_docs,
            generation = manifest.generation,
            "opened search view"
        );

        Ok(Self {
            path: path.to_path_buf(),
            encoding: manifest.encoding,
            generation: manifest.generation,
            segments,
            lookups,
            total_live_docs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> TermEncoding {
        self.encoding
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn live_doc_count(&self) -> u64 {
        self.total_live_docs
    }

    fn lookup(&self, segment_idx: usize, docno: DocNo) -> Option<(MoleculeId, u32)> {
        self.lookups[segment_idx].get(&self.segments[segment_idx], docno)
    }

    /// All matches of a ranked similarity query in exact global order
    /// (score descending, id ascending). Used by the pagination cursor.
    pub(crate) fn ranked_hits(
        &self,
        query: &DisjunctiveQuery,
        cutoff: f32,
    ) -> Result<Vec<ScoredHit>> {
        let collector = SortedHits::new();
        self.segments
            .par_iter()
            .enumerate()
            .try_for_each(|(idx, segment)| -> Result<()> {
                for (docno, shared) in query.shared_counts(segment)? {
                    let Some((id, target_size)) = self.lookup(idx, docno) else {
                        continue;
                    };
                    let score = tanimoto(shared, query.query_size(), target_size);
                    if score >= cutoff {
                        collector.push(ScoredHit::ranked(id, score));
                    }
                }
                Ok(())
            })?;
        Ok(collector.into_hits())
    }
}

struct Watcher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct SessionShared {
    view: ArcSwapOption<SearchView>,
}

/// Read session over one index path at a time
pub struct SearchSession {
    shared: Arc<SessionShared>,
    cache_mode: LookupCacheMode,
    watcher: parking_lot::Mutex<Option<Watcher>>,
}

impl SearchSession {
    /// Create a session with no view open yet
    pub fn new(cache_mode: LookupCacheMode) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                view: ArcSwapOption::new(None),
            }),
            cache_mode,
            watcher: parking_lot::Mutex::new(None),
        }
    }

    /// Close any prior view and open a read-only view over `path`.
    /// Starts a watcher that closes this view once `path` is deleted.
    pub fn set_folder<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let view = Arc::new(SearchView::open(path.as_ref(), self.cache_mode)?);

        self.stop_watcher();
        self.shared.view.store(Some(Arc::clone(&view)));
        self.start_watcher(view);
        Ok(())
    }

    /// Close the current view without opening another
    pub fn close(&self) {
        self.stop_watcher();
        self.shared.view.store(None);
    }

    /// The currently open view, pinned for the caller's lifetime of use
    pub fn current_view(&self) -> Result<Arc<SearchView>> {
        self.shared
            .view
            .load_full()
            .ok_or(MolScreenError::NoViewOpen)
    }

    pub fn has_view(&self) -> bool {
        self.shared.view.load().is_some()
    }

    pub fn segment_count(&self) -> usize {
        self.shared
            .view
            .load()
            .as_ref()
            .map(|v| v.segment_count())
            .unwrap_or(0)
    }

    pub fn live_doc_count(&self) -> u64 {
        self.shared
            .view
            .load()
            .as_ref()
            .map(|v| v.live_doc_count())
            .unwrap_or(0)
    }

    /// Substructure screening: the complete, sound conjunctive pre-filter.
    ///
    /// Returns a bitset with one bit per matching external id below
    /// `max_id`. An empty `required_bits` matches every live document.
    pub fn subsearch(&self, required_bits: &[u32], max_id: u32) -> Result<RoaringBitmap> {
        let view = self.current_view()?;
        let query = ConjunctiveQuery::new(required_bits, view.encoding);

        let ids = if view.segments.len() <= 1 {
            // Single segment: no fan-out, no locking
            let mut hits = UnsortedHits::new();
            if let Some(segment) = view.segments.first() {
                collect_screen_matches(&view, 0, segment, &query, max_id, |id| hits.push(id))?;
            }
            hits.into_vec()
        } else {
            let workers: Vec<ChunkedHits<MoleculeId>> = view
                .segments
                .par_iter()
                .enumerate()
                .map(|(idx, segment)| -> Result<ChunkedHits<MoleculeId>> {
                    let mut chunks = ChunkedHits::new(MATCH_CHUNK_SIZE);
                    collect_screen_matches(&view, idx, segment, &query, max_id, |id| {
                        chunks.push(id)
                    })?;
                    Ok(chunks)
                })
                .collect::<Result<Vec<_>>>()?;
            merge_chunks(workers)
        };

        let mut bitset = RoaringBitmap::new();
        for id in ids {
            bitset.insert(id);
        }
        tracing::debug!(
            matches = bitset.len(),
            segments = view.segment_count(),
            "screening query done"
        );
        Ok(bitset)
    }

    /// Ranked Tanimoto similarity search, top `top` hits at or above
    /// `cutoff`, sorted by score descending then id ascending.
    pub fn simsearch(&self, query_bits: &[u32], top: usize, cutoff: f32) -> Result<Vec<ScoredHit>> {
        self.simsearch_with_deadline(query_bits, top, cutoff, None)
    }

    /// Like [`simsearch`](Self::simsearch), but candidates not yet scored
    /// when `deadline` passes are reported with the timed-out sentinel
    /// instead of failing the whole query.
    pub fn simsearch_with_deadline(
        &self,
        query_bits: &[u32],
        top: usize,
        cutoff: f32,
        deadline: Option<Instant>,
    ) -> Result<Vec<ScoredHit>> {
        let view = self.current_view()?;
        let query = DisjunctiveQuery::new(query_bits, view.encoding);
        let collector = BoundedTopK::new(top, view.total_live_docs);

        view.segments
            .par_iter()
            .enumerate()
            .try_for_each(|(idx, segment)| -> Result<()> {
                for (docno, shared) in query.shared_counts(segment)? {
                    let Some((id, target_size)) = view.lookup(idx, docno) else {
                        continue;
                    };
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        collector.offer(ScoredHit::timed_out(id));
                        continue;
                    }
                    let score = tanimoto(shared, query.query_size(), target_size);
                    if score >= cutoff {
                        collector.offer(ScoredHit::ranked(id, score));
                    }
                }
                Ok(())
            })?;

        Ok(collector.into_hits())
    }

    /// Prepare a resumable top-K pagination cursor over one similarity
    /// query, pinned to the current view.
    pub fn paginate(
        &self,
        query_bits: &[u32],
        cutoff: f32,
        page_capacity: usize,
    ) -> Result<crate::search::PaginatedCursor> {
        let view = self.current_view()?;
        let query = DisjunctiveQuery::new(query_bits, view.encoding);
        Ok(crate::search::PaginatedCursor::new(
            view,
            query,
            cutoff,
            page_capacity,
        ))
    }

    fn start_watcher(&self, view: Arc<SearchView>) {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::spawn(move || {
            let path = view.path().to_path_buf();
            loop {
                match stop_rx.recv_timeout(WATCH_INTERVAL) {
                    Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                }
                match std::fs::metadata(&path) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // Replacement published. Close our view only if it
                        // is still the live one; a newer view must survive
                        // a stale watcher.
                        let current = shared.view.load();
                        if let Some(cur) = &*current {
                            if Arc::ptr_eq(cur, &view) {
                                shared.view.store(None);
                                tracing::info!(
                                    path = %path.display(),
                                    "index path deleted, closed view"
                                );
                            }
                        }
                        return;
                    }
                    Err(e) => {
                        // Watcher failures kill only the watcher; readers
                        // keep the last good view.
                        tracing::warn!(path = %path.display(), error = %e, "reload watcher failed");
                        return;
                    }
                }
            }
        });

        *self.watcher.lock() = Some(Watcher {
            stop: stop_tx,
            handle,
        });
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            let _ = watcher.stop.send(());
            let _ = watcher.handle.join();
        }
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Run one segment's screening matches through the id filter
fn collect_screen_matches(
    view: &SearchView,
    segment_idx: usize,
    segment: &SegmentReader,
    query: &ConjunctiveQuery,
    max_id: u32,
    mut sink: impl FnMut(MoleculeId),
) -> Result<()> {
    for docno in query.matching_docnos(segment)? {
        let Some((id, _)) = view.lookup(segment_idx, docno) else {
            continue;
        };
        if id < max_id {
            sink(id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::index::Indexer;
    use crate::segment::HitScore;
    use tempfile::TempDir;

    fn build_index(tmp: &TempDir, records: &[(u32, &[u32], &[u32])]) {
        let mut indexer = Indexer::begin(tmp.path(), IndexSettings::default()).unwrap();
        for &(id, sub, sim) in records {
            indexer.add(id, sub.to_vec(), sim.to_vec()).unwrap();
        }
        indexer.commit().unwrap();
    }

    fn session_over(tmp: &TempDir, mode: LookupCacheMode) -> SearchSession {
        let session = SearchSession::new(mode);
        session.set_folder(tmp.path()).unwrap();
        session
    }

    #[test]
    fn test_no_view_is_an_error() {
        let session = SearchSession::new(LookupCacheMode::Eager);
        assert!(matches!(
            session.subsearch(&[], 10).unwrap_err(),
            MolScreenError::NoViewOpen
        ));
    }

    #[test]
    fn test_subsearch_empty_query_matches_all_below_max_id() {
        let tmp = TempDir::new().unwrap();
        build_index(&tmp, &[(1, &[1], &[1]), (5, &[2], &[2]), (9, &[3], &[3])]);
        let session = session_over(&tmp, LookupCacheMode::Eager);

        let hits = session.subsearch(&[], 100).unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1, 5, 9]);

        // max_id caps the bitset
        let hits = session.subsearch(&[], 6).unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn test_subsearch_is_conjunctive() {
        let tmp = TempDir::new().unwrap();
        build_index(
            &tmp,
            &[
                (1, &[10, 11, 12], &[]),
                (2, &[10, 11], &[]),
                (3, &[12], &[]),
            ],
        );
        let session = session_over(&tmp, LookupCacheMode::Lazy);

        let hits = session.subsearch(&[10, 11], 100).unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1, 2]);

        let hits = session.subsearch(&[10, 11, 12], 100).unwrap();
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1]);

        let hits = session.subsearch(&[99], 100).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_simsearch_concrete_ranking() {
        // Three molecules with similarity bits {1,2,3}, {2,3,4}, {5,6}:
        // query [2,3] ranks molecule 1 (2/3) ahead of molecule 2 (2/4);
        // molecule 3 shares nothing and is never returned.
        let tmp = TempDir::new().unwrap();
        build_index(
            &tmp,
            &[
                (1, &[], &[1, 2, 3]),
                (2, &[], &[2, 3, 4]),
                (3, &[], &[5, 6]),
            ],
        );
        let session = session_over(&tmp, LookupCacheMode::Eager);

        let hits = session.simsearch(&[2, 3], 2, 0.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert!((hits[0].score.ranked().unwrap() - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(hits[1].id, 2);
        assert!((hits[1].score.ranked().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_simsearch_cutoff() {
        let tmp = TempDir::new().unwrap();
        build_index(&tmp, &[(1, &[], &[1, 2, 3]), (2, &[], &[2, 3, 4])]);
        let session = session_over(&tmp, LookupCacheMode::Eager);

        let hits = session.simsearch(&[2, 3], 10, 0.6).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn test_simsearch_top_caps_results() {
        let tmp = TempDir::new().unwrap();
        build_index(
            &tmp,
            &[
                (1, &[], &[1]),
                (2, &[], &[1, 2]),
                (3, &[], &[1, 2, 3]),
                (4, &[], &[1, 2, 3, 4]),
            ],
        );
        let session = session_over(&tmp, LookupCacheMode::Eager);

        let hits = session.simsearch(&[1], 2, 0.0).unwrap();
        assert_eq!(hits.len(), 2);
        // Smallest fingerprints score highest against a 1-bit query
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 2);
    }

    #[test]
    fn test_expired_deadline_degrades_to_sentinels() {
        let tmp = TempDir::new().unwrap();
        build_index(&tmp, &[(1, &[], &[1, 2]), (2, &[], &[2, 3])]);
        let session = session_over(&tmp, LookupCacheMode::Eager);

        let past = Instant::now() - Duration::from_secs(1);
        let hits = session
            .simsearch_with_deadline(&[2], 10, 0.0, Some(past))
            .unwrap();

        // Both candidates matched but neither was scored
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score == HitScore::TimedOut));
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 2);
    }

    #[test]
    fn test_lookup_cache_modes_agree() {
        let tmp = TempDir::new().unwrap();
        build_index(
            &tmp,
            &[(7, &[1, 2], &[1, 2, 3]), (8, &[2], &[2, 4]), (9, &[3], &[9])],
        );

        let mut results = Vec::new();
        for mode in [
            LookupCacheMode::Disabled,
            LookupCacheMode::Eager,
            LookupCacheMode::Lazy,
        ] {
            let session = session_over(&tmp, mode);
            let screen = session.subsearch(&[2], 100).unwrap();
            let ranked = session.simsearch(&[2, 3], 10, 0.0).unwrap();
            results.push((screen, ranked));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn test_hot_reload_closes_replaced_view() {
        let tmp = TempDir::new().unwrap();
        let index_dir = tmp.path().join("current");
        std::fs::create_dir(&index_dir).unwrap();
        {
            let mut indexer = Indexer::begin(&index_dir, IndexSettings::default()).unwrap();
            indexer.add(1, vec![1], vec![1]).unwrap();
            indexer.commit().unwrap();
        }

        let session = SearchSession::new(LookupCacheMode::Eager);
        session.set_folder(&index_dir).unwrap();
        assert!(session.has_view());

        // A query holds the view across the swap
        let pinned = session.current_view().unwrap();

        std::fs::remove_dir_all(&index_dir).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.has_view() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!session.has_view());

        // The pinned view still answers
        assert_eq!(pinned.live_doc_count(), 1);
    }

    #[test]
    fn test_stale_watcher_never_closes_newer_view() {
        let tmp = TempDir::new().unwrap();
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        for dir in [&dir_a, &dir_b] {
            std::fs::create_dir(dir).unwrap();
            let mut indexer = Indexer::begin(dir, IndexSettings::default()).unwrap();
            indexer.add(1, vec![1], vec![1]).unwrap();
            indexer.commit().unwrap();
        }

        let session = SearchSession::new(LookupCacheMode::Eager);
        session.set_folder(&dir_a).unwrap();
        // Swap to B; A's watcher is stopped, B's view must stay live
        session.set_folder(&dir_b).unwrap();

        std::fs::remove_dir_all(&dir_a).unwrap();
        std::thread::sleep(WATCH_INTERVAL * 3);
        assert!(session.has_view());
        assert_eq!(session.current_view().unwrap().path(), dir_b.as_path());
    }
}
