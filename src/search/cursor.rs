//! Resumable top-K pagination over one similarity query
//!
//! The cursor pins the view it was created from, materializes the full
//! ranked result exactly once, and hands it out page by page through
//! fixed-capacity reusable buffers. Successive `load` calls resume
//! strictly after the last hit returned, so concatenating pages yields
//! the same sequence as one query sized to the total result count.

use std::sync::Arc;

use crate::error::Result;
use crate::index::SearchView;
use crate::segment::MoleculeId;

use super::query::DisjunctiveQuery;

pub struct PaginatedCursor {
    view: Arc<SearchView>,
    query: DisjunctiveQuery,
    cutoff: f32,
    /// Ranked hits, filled on the first `load` and never recomputed
    hits: Option<Vec<(MoleculeId, f32)>>,
    pos: usize,
    ids: Vec<MoleculeId>,
    scores: Vec<f32>,
}

impl PaginatedCursor {
    pub(crate) fn new(
        view: Arc<SearchView>,
        query: DisjunctiveQuery,
        cutoff: f32,
        page_capacity: usize,
    ) -> Self {
        let page_capacity = page_capacity.max(1);
        Self {
            view,
            query,
            cutoff,
            hits: None,
            pos: 0,
            ids: vec![0; page_capacity],
            scores: vec![0.0; page_capacity],
        }
    }

    /// Fetch up to `limit` further hits into the reusable buffers,
    /// returning how many were written. 0 means the cursor is exhausted.
    /// `limit` is capped at the cursor's page capacity.
    pub fn load(&mut self, limit: usize) -> Result<usize> {
        if self.hits.is_none() {
            let ranked = self
                .view
                .ranked_hits(&self.query, self.cutoff)?
                .into_iter()
                .filter_map(|h| h.score.ranked().map(|s| (h.id, s)))
                .collect();
            self.hits = Some(ranked);
        }
        let hits = self.hits.as_ref().expect("materialized above");

        let limit = limit.min(self.ids.len());
        let available = hits.len() - self.pos;
        let count = limit.min(available);

        for (i, &(id, score)) in hits[self.pos..self.pos + count].iter().enumerate() {
            self.ids[i] = id;
            self.scores[i] = score;
        }
        self.pos += count;
        Ok(count)
    }

    /// Id buffer; only the first `count` entries of the latest `load` are
    /// meaningful
    pub fn ids(&self) -> &[MoleculeId] {
        &self.ids
    }

    /// Score buffer, parallel to [`ids`](Self::ids)
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Page capacity the cursor was built with
    pub fn page_capacity(&self) -> usize {
        self.ids.len()
    }
}
