//! Segment merge balancing
//!
//! The balancer keeps the segment count near a configured target by
//! greedily folding the smallest segments into the smallest member of the
//! top-K group. This bounds per-query fan-out without letting one
//! oversized segment dominate merge cost.

use crate::config::BalancerConfig;
use crate::error::{MolScreenError, Result};

use super::types::SegmentId;

/// Per-segment weights the balancer decides over
#[derive(Clone, Debug)]
pub struct SegmentWeight {
    pub id: SegmentId,
    /// Live (non-deleted) document count
    pub live_docs: u64,
    /// Logically deleted document count
    pub deleted_docs: u64,
}

/// One group of segments to merge into a single output segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeGroup {
    pub segment_ids: Vec<SegmentId>,
    /// Total live-doc weight of the group
    pub weight: u64,
}

/// Decides which segments to merge
#[derive(Clone, Debug)]
pub struct SegmentMergeBalancer {
    config: BalancerConfig,
}

impl SegmentMergeBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self { config }
    }

    pub fn target_segments(&self) -> usize {
        self.config.target_segments
    }

    /// Compute merge groups so that the resulting group count is at most
    /// the configured target.
    ///
    /// Greedy pass: while there are more groups than the target, sort
    /// groups descending by weight and fold the smallest remaining group
    /// into the smallest of the top-K. Only groups that absorbed at least
    /// one other segment are emitted.
    pub fn find_merges(&self, segments: &[SegmentWeight]) -> Vec<MergeGroup> {
        let target = self.config.target_segments.max(1);

        let mut groups: Vec<MergeGroup> = segments
            .iter()
            .map(|s| MergeGroup {
                segment_ids: vec![s.id],
                weight: s.live_docs,
            })
            .collect();

        while groups.len() > target {
            groups.sort_by(|a, b| b.weight.cmp(&a.weight));
            let smallest = groups.pop().expect("len > target >= 1");
            let receiver = &mut groups[target - 1];
            receiver.segment_ids.extend(smallest.segment_ids);
            receiver.weight += smallest.weight;
        }

        let merges: Vec<MergeGroup> = groups
            .into_iter()
            .filter(|g| g.segment_ids.len() > 1)
            .collect();

        if !merges.is_empty() {
            tracing::debug!(
                merges = merges.len(),
                target,
                "balancer selected merge groups"
            );
        }
        merges
    }

    /// Singleton self-merges for every segment carrying deletions, so
    /// their space is reclaimed independently of the balancing pass.
    pub fn forced_delete_merges(&self, segments: &[SegmentWeight]) -> Vec<MergeGroup> {
        segments
            .iter()
            .filter(|s| s.deleted_docs > 0)
            .map(|s| MergeGroup {
                segment_ids: vec![s.id],
                weight: s.live_docs,
            })
            .collect()
    }

    /// Merging down to an exact segment count beyond the balancer's own
    /// policy is not supported and fails fast.
    pub fn forced_merge_to(&self, _segments: &[SegmentWeight], n: usize) -> Result<Vec<MergeGroup>> {
        Err(MolScreenError::Unsupported(format!(
            "forced merge to exactly {} segments",
            n
        )))
    }
}

impl Default for SegmentMergeBalancer {
    fn default() -> Self {
        Self::new(BalancerConfig::default())
    }
}
