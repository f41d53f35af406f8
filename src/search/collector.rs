//! Result aggregation strategies
//!
//! A search fans out across segments and each worker reports partial
//! matches; one of four strategies turns those into the final array:
//!
//! - [`UnsortedHits`]: one growable buffer, no locking, single-threaded
//! - [`ChunkedHits`]: per-worker fixed-size chunks, merged by one final
//!   concatenation into an exactly-sized output
//! - [`SortedHits`]: one shared lock-protected list, sorted once at the end
//! - [`BoundedTopK`]: one shared fixed-capacity heap with a side-list for
//!   timed-out sentinel hits

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::segment::{HitScore, MoleculeId, ScoredHit};

/// Final ranking order: ranked hits by score descending then id ascending,
/// timed-out hits after every ranked hit, ordered by id.
pub fn rank_order(a: &ScoredHit, b: &ScoredHit) -> Ordering {
    match (a.score, b.score) {
        (HitScore::Ranked(sa), HitScore::Ranked(sb)) => OrderedFloat(sb)
            .cmp(&OrderedFloat(sa))
            .then_with(|| a.id.cmp(&b.id)),
        (HitScore::Ranked(_), HitScore::TimedOut) => Ordering::Less,
        (HitScore::TimedOut, HitScore::Ranked(_)) => Ordering::Greater,
        (HitScore::TimedOut, HitScore::TimedOut) => a.id.cmp(&b.id),
    }
}

/// Single-threaded growable collection. The simplest strategy: one buffer,
/// doubling reallocation, no synchronization of any kind.
#[derive(Debug, Default)]
pub struct UnsortedHits<T> {
    items: Vec<T>,
}

impl<T> UnsortedHits<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

/// Per-worker chunked collection. Each worker owns one `ChunkedHits` and
/// appends into fixed-size chunks, so a full chunk is never copied to
/// grow. `merge_chunks` concatenates every worker's chunks into one
/// exactly-sized output.
#[derive(Debug)]
pub struct ChunkedHits<T> {
    chunks: Vec<Vec<T>>,
    chunk_size: usize,
}

impl<T> ChunkedHits<T> {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        let need_chunk = match self.chunks.last() {
            Some(chunk) => chunk.len() >= self.chunk_size,
            None => true,
        };
        if need_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_size));
        }
        self.chunks.last_mut().expect("chunk just ensured").push(item);
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

/// Concatenate all chunks from all workers into one exactly-sized vector
pub fn merge_chunks<T>(workers: Vec<ChunkedHits<T>>) -> Vec<T> {
    let total: usize = workers.iter().map(|w| w.len()).sum();
    let mut out = Vec::with_capacity(total);
    for worker in workers {
        for chunk in worker.chunks {
            out.extend(chunk);
        }
    }
    out
}

/// Shared full-sort collection: workers push under one lock, the final
/// reduce runs a single comparator sort. Exact global order; cost scales
/// with the total match count.
#[derive(Debug, Default)]
pub struct SortedHits {
    hits: Mutex<Vec<ScoredHit>>,
}

impl SortedHits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, hit: ScoredHit) {
        self.hits.lock().push(hit);
    }

    pub fn into_hits(self) -> Vec<ScoredHit> {
        let mut hits = self.hits.into_inner();
        hits.sort_by(rank_order);
        hits
    }
}

/// Entry in the bounded heap. The heap's maximum is the WORST ranked hit
/// (lowest score, then largest id), so the root is the eviction candidate.
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    score: OrderedFloat<f32>,
    id: MoleculeId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TopKState {
    heap: BinaryHeap<HeapEntry>,
    /// Resolved on first offer: min(requested limit, total live docs)
    limit: Option<usize>,
    /// Timed-out sentinel hits never compete for heap slots
    timed_out: Vec<MoleculeId>,
}

/// Shared bounded top-K collection: one fixed-capacity binary heap behind
/// a single lock. Every ranked offer is O(log limit). Sentinel hits are
/// tracked in an unbounded side-list and reported after all ranked hits.
pub struct BoundedTopK {
    state: Mutex<TopKState>,
    requested: usize,
    total_live_docs: u64,
}

impl BoundedTopK {
    pub fn new(requested: usize, total_live_docs: u64) -> Self {
        Self {
            state: Mutex::new(TopKState {
                heap: BinaryHeap::new(),
                limit: None,
                timed_out: Vec::new(),
            }),
            requested,
            total_live_docs,
        }
    }

    /// Offer one hit. Ranked hits compete for the K slots; timed-out hits
    /// are recorded on the side.
    pub fn offer(&self, hit: ScoredHit) {
        let mut state = self.state.lock();
        match hit.score {
            HitScore::TimedOut => state.timed_out.push(hit.id),
            HitScore::Ranked(score) => {
                let limit = *state.limit.get_or_insert_with(|| {
                    self.requested.min(self.total_live_docs as usize)
                });
                if limit == 0 {
                    return;
                }
                let entry = HeapEntry {
                    score: OrderedFloat(score),
                    id: hit.id,
                };
                if state.heap.len() < limit {
                    state.heap.push(entry);
                } else if let Some(worst) = state.heap.peek() {
                    // Under HeapEntry's ordering, smaller = better
                    if entry < *worst {
                        state.heap.pop();
                        state.heap.push(entry);
                    }
                }
            }
        }
    }

    /// Final reduce: heap contents sorted best-first, then the side-list
    /// sorted by id, each still tagged as timed out.
    pub fn into_hits(self) -> Vec<ScoredHit> {
        let state = self.state.into_inner();

        // `into_sorted_vec` yields ascending order; with the inverted
        // HeapEntry ordering that is best-first already.
        let mut hits: Vec<ScoredHit> = state
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| ScoredHit::ranked(e.id, e.score.into_inner()))
            .collect();

        let mut late = state.timed_out;
        late.sort_unstable();
        hits.extend(late.into_iter().map(ScoredHit::timed_out));
        hits
    }
}
