//! Term dictionary using FST (Finite State Transducer)
//!
//! Maps encoded feature terms to postings metadata. Keys are the byte
//! encodings produced by the configured `TermEncoding` (6-byte text tokens
//! or 4-byte big-endian points); the FST stores an index into a parallel
//! metadata array.

use std::io;

use fst::{Map, MapBuilder, Streamer};

use super::types::PostingListMeta;

/// Term dictionary backed by FST
#[derive(Debug)]
pub struct TermDictionary {
    /// FST mapping term bytes -> index in metadata array
    fst: Map<Vec<u8>>,
    /// Metadata for each term (parallel to FST output values)
    metadata: Vec<PostingListMeta>,
}

impl TermDictionary {
    /// Create a term dictionary from FST data and metadata
    pub fn new(fst_data: Vec<u8>, metadata: Vec<PostingListMeta>) -> io::Result<Self> {
        let fst = Map::new(fst_data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self { fst, metadata })
    }

    /// Create an empty dictionary
    pub fn empty() -> Self {
        TermDictionaryBuilder::new()
            .build()
            .expect("building an empty FST cannot fail")
    }

    /// Look up a term and return its postings metadata
    pub fn get(&self, term: &[u8]) -> Option<&PostingListMeta> {
        self.fst.get(term).map(|idx| &self.metadata[idx as usize])
    }

    /// Check if a term exists
    pub fn contains(&self, term: &[u8]) -> bool {
        self.fst.contains_key(term)
    }

    /// Get the number of terms
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Get the raw FST data (for serialization)
    pub fn fst_bytes(&self) -> &[u8] {
        self.fst.as_fst().as_bytes()
    }

    /// Get the metadata array (for serialization)
    pub fn metadata(&self) -> &[PostingListMeta] {
        &self.metadata
    }

    /// Iterate over all terms in the dictionary, in key order
    pub fn iter_terms(&self) -> Vec<(Vec<u8>, &PostingListMeta)> {
        let mut results = Vec::with_capacity(self.metadata.len());
        let mut stream = self.fst.stream();
        while let Some((key, idx)) = stream.next() {
            results.push((key.to_vec(), &self.metadata[idx as usize]));
        }
        results
    }
}

/// Builder for term dictionaries
pub struct TermDictionaryBuilder {
    terms: Vec<(Vec<u8>, PostingListMeta)>,
}

impl TermDictionaryBuilder {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
        }
    }

    /// Add a term with its postings metadata. Insertion order is free;
    /// the builder sorts by key before constructing the FST.
    pub fn add(&mut self, term: Vec<u8>, meta: PostingListMeta) {
        self.terms.push((term, meta));
    }

    /// Build the term dictionary
    pub fn build(mut self) -> io::Result<TermDictionary> {
        // FST requires sorted input
        self.terms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fst_builder = MapBuilder::memory();
        let mut metadata = Vec::with_capacity(self.terms.len());

        for (idx, (term, meta)) in self.terms.into_iter().enumerate() {
            fst_builder
                .insert(&term, idx as u64)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            metadata.push(meta);
        }

        let fst_data = fst_builder
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        TermDictionary::new(fst_data, metadata)
    }
}

impl Default for TermDictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermEncoding;

    fn meta(offset: u64, df: u32) -> PostingListMeta {
        PostingListMeta {
            offset,
            length: 10,
            doc_frequency: df,
        }
    }

    #[test]
    fn test_term_dictionary_builder() {
        let enc = TermEncoding::Text;
        let mut builder = TermDictionaryBuilder::new();

        // Unsorted insertion order
        builder.add(enc.encode(900), meta(200, 3));
        builder.add(enc.encode(4), meta(0, 10));
        builder.add(enc.encode(77), meta(100, 20));

        let dict = builder.build().unwrap();

        assert_eq!(dict.len(), 3);
        assert!(dict.contains(&enc.encode(4)));
        assert!(dict.contains(&enc.encode(77)));
        assert!(dict.contains(&enc.encode(900)));
        assert!(!dict.contains(&enc.encode(5)));

        let m = dict.get(&enc.encode(4)).unwrap();
        assert_eq!(m.offset, 0);
        assert_eq!(m.doc_frequency, 10);
    }

    #[test]
    fn test_points_keys() {
        let enc = TermEncoding::Points;
        let mut builder = TermDictionaryBuilder::new();
        builder.add(enc.encode(1000), meta(0, 1));
        builder.add(enc.encode(2), meta(10, 2));

        let dict = builder.build().unwrap();
        assert_eq!(dict.get(&enc.encode(2)).unwrap().doc_frequency, 2);
        assert_eq!(dict.get(&enc.encode(1000)).unwrap().doc_frequency, 1);
    }

    #[test]
    fn test_iter_terms_in_key_order() {
        let enc = TermEncoding::Points;
        let mut builder = TermDictionaryBuilder::new();
        builder.add(enc.encode(30), meta(0, 1));
        builder.add(enc.encode(10), meta(10, 1));
        builder.add(enc.encode(20), meta(20, 1));

        let dict = builder.build().unwrap();
        let features: Vec<u32> = dict
            .iter_terms()
            .into_iter()
            .map(|(key, _)| enc.decode(&key).unwrap())
            .collect();
        // Big-endian point keys sort numerically
        assert_eq!(features, vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_dictionary() {
        let dict = TermDictionary::empty();
        assert!(dict.is_empty());
        assert!(dict.get(b"anything").is_none());
    }
}
