//! Immutable segment reader
//!
//! A segment is an immutable batch of molecule records: one posting file
//! and term dictionary per fingerprint field, the doc-number map, and the
//! stored-values column. Readers are shared across search workers behind
//! an `Arc` and never mutated.

use std::io;

use serde::{Deserialize, Serialize};

use super::docno_map::DocNoMap;
use super::docvalues::DocValuesReader;
use super::postings::{PostingIterator, PostingsReader};
use super::term_dict::TermDictionary;
use super::types::{DocNo, MoleculeId, PostingListMeta, SegmentId};

/// Metadata for a segment stored in the manifest
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Unique segment identifier
    pub id: SegmentId,
    /// Number of documents in the segment
    pub doc_count: u32,
    /// Number of live (non-deleted) documents
    pub live_doc_count: u32,
    /// Size in bytes (all immutable segment files combined)
    pub size_bytes: u64,
    /// Creation timestamp
    pub created_at: u64,
}

impl SegmentMeta {
    pub fn deleted_count(&self) -> u32 {
        self.doc_count - self.live_doc_count
    }
}

/// One indexed fingerprint field: term dictionary plus postings
#[derive(Debug)]
pub struct FieldReader {
    terms: TermDictionary,
    postings: PostingsReader,
}

impl FieldReader {
    pub fn new(terms: TermDictionary, postings: PostingsReader) -> Self {
        Self { terms, postings }
    }

    /// Postings metadata for an encoded feature term
    pub fn meta(&self, term: &[u8]) -> Option<&PostingListMeta> {
        self.terms.get(term)
    }

    /// Iterate the posting list for an encoded feature term
    pub fn postings(&self, term: &[u8]) -> io::Result<Option<PostingIterator<'_>>> {
        match self.terms.get(term) {
            Some(meta) => Ok(Some(self.postings.get_postings(meta)?)),
            None => Ok(None),
        }
    }

    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    pub fn postings_reader(&self) -> &PostingsReader {
        &self.postings
    }
}

/// Immutable segment reader
#[derive(Debug)]
pub struct SegmentReader {
    meta: SegmentMeta,
    /// Substructure fingerprint field (`subfp`)
    sub: FieldReader,
    /// Similarity fingerprint field (`simfp`)
    sim: FieldReader,
    docno_map: DocNoMap,
    docvalues: DocValuesReader,
}

impl SegmentReader {
    pub fn from_parts(
        meta: SegmentMeta,
        sub: FieldReader,
        sim: FieldReader,
        docno_map: DocNoMap,
        docvalues: DocValuesReader,
    ) -> Self {
        Self {
            meta,
            sub,
            sim,
            docno_map,
            docvalues,
        }
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    /// Substructure field
    pub fn sub(&self) -> &FieldReader {
        &self.sub
    }

    /// Similarity field
    pub fn sim(&self) -> &FieldReader {
        &self.sim
    }

    pub fn docno_map(&self) -> &DocNoMap {
        &self.docno_map
    }

    pub fn docvalues(&self) -> &DocValuesReader {
        &self.docvalues
    }

    /// External molecule id for a docno
    pub fn molecule_id(&self, docno: DocNo) -> Option<MoleculeId> {
        self.docno_map.molecule_id(docno)
    }

    /// Stored similarity fingerprint cardinality for a docno
    pub fn sim_size(&self, docno: DocNo) -> Option<u32> {
        self.docvalues.sim_size(docno)
    }

    pub fn is_deleted(&self, docno: DocNo) -> bool {
        self.docno_map.is_deleted(docno)
    }

    pub fn is_live(&self, docno: DocNo) -> bool {
        self.docno_map.is_live(docno)
    }

    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count
    }

    pub fn live_doc_count(&self) -> u32 {
        self.docno_map.live_count() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.docno_map.deleted_count() as u32
    }
}
