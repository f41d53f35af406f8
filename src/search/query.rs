//! Query construction over fingerprint feature ids
//!
//! Screening is a conjunction over the substructure field; similarity is a
//! disjunction over the similarity field whose raw score is the shared-bit
//! count, later rescored as a Tanimoto coefficient.

use std::collections::HashMap;
use std::io;

use crate::segment::{DocNo, PostingListMeta, SegmentReader};
use crate::term::TermEncoding;

/// Conjunction over substructure features. An empty bit list matches all
/// live documents.
pub struct ConjunctiveQuery {
    terms: Vec<Vec<u8>>,
}

impl ConjunctiveQuery {
    pub fn new(required_bits: &[u32], encoding: TermEncoding) -> Self {
        let mut bits = required_bits.to_vec();
        bits.sort_unstable();
        bits.dedup();
        Self {
            terms: bits.iter().map(|&b| encoding.encode(b)).collect(),
        }
    }

    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
    }

    /// All live docnos in this segment whose substructure fingerprint
    /// contains every required feature.
    pub fn matching_docnos(&self, segment: &SegmentReader) -> io::Result<Vec<DocNo>> {
        if self.is_match_all() {
            return Ok(segment.docno_map().live_docs().map(|(d, _)| d).collect());
        }

        // Resolve every term first; one absent term empties the conjunction
        let mut metas: Vec<&PostingListMeta> = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match segment.sub().meta(term) {
                Some(meta) => metas.push(meta),
                None => return Ok(Vec::new()),
            }
        }

        // Drive the intersection from the rarest feature
        metas.sort_by_key(|m| m.doc_frequency);

        let mut candidates: Vec<DocNo> = segment
            .sub()
            .postings_reader()
            .get_postings(metas[0])?
            .collect();

        for meta in &metas[1..] {
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            let mut survivors = Vec::with_capacity(candidates.len());
            let mut other = segment.sub().postings_reader().get_postings(meta)?;
            let mut next = other.next();
            for &candidate in &candidates {
                while let Some(d) = next {
                    if d < candidate {
                        next = other.next();
                    } else {
                        break;
                    }
                }
                if next == Some(candidate) {
                    survivors.push(candidate);
                }
            }
            candidates = survivors;
        }

        candidates.retain(|&d| segment.is_live(d));
        Ok(candidates)
    }
}

/// Disjunction over similarity features, counting shared bits per document
pub struct DisjunctiveQuery {
    terms: Vec<Vec<u8>>,
    query_size: u32,
}

impl DisjunctiveQuery {
    pub fn new(query_bits: &[u32], encoding: TermEncoding) -> Self {
        let mut bits = query_bits.to_vec();
        bits.sort_unstable();
        bits.dedup();
        Self {
            terms: bits.iter().map(|&b| encoding.encode(b)).collect(),
            query_size: bits.len() as u32,
        }
    }

    /// Deduplicated cardinality of the query fingerprint
    pub fn query_size(&self) -> u32 {
        self.query_size
    }

    /// Shared-bit counts for every live document in this segment that
    /// shares at least one feature with the query.
    pub fn shared_counts(&self, segment: &SegmentReader) -> io::Result<HashMap<DocNo, u32>> {
        let mut counts: HashMap<DocNo, u32> = HashMap::new();
        for term in &self.terms {
            if let Some(postings) = segment.sim().postings(term)? {
                for docno in postings {
                    if segment.is_live(docno) {
                        *counts.entry(docno).or_insert(0) += 1;
                    }
                }
            }
        }
        Ok(counts)
    }
}

/// Tanimoto coefficient: shared / (query + target - shared), in [0, 1]
pub fn tanimoto(shared: u32, query_size: u32, target_size: u32) -> f32 {
    let denominator = query_size + target_size - shared;
    if denominator == 0 {
        return 0.0;
    }
    shared as f32 / denominator as f32
}
