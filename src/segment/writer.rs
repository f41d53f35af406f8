//! Segment writer for creating new immutable segments
//!
//! Two paths produce segments: flushing the mutable buffer, and merging
//! existing segments. Both drop logically-deleted records and renumber the
//! survivors into a fresh dense docno space.

use std::collections::BTreeMap;
use std::io;

use crc32fast::Hasher;

use crate::term::TermEncoding;

use super::buffer::MutableBuffer;
use super::docno_map::DocNoMap;
use super::docvalues::DocValuesReader;
use super::postings::{PostingsReader, PostingsWriter};
use super::reader::{FieldReader, SegmentMeta, SegmentReader};
use super::term_dict::{TermDictionary, TermDictionaryBuilder};
use super::types::{DocNo, PostingListMeta, SegmentId};

/// Serialized artifacts of one indexed fingerprint field
pub struct FieldArtifacts {
    /// Encoded posting lists
    pub postings: Vec<u8>,
    /// Term dictionary FST data
    pub fst: Vec<u8>,
    /// Per-term postings metadata
    pub meta: Vec<PostingListMeta>,
}

/// Result of writing a segment
pub struct SegmentWriteResult {
    /// The created segment reader
    pub reader: SegmentReader,
    /// Substructure field artifacts
    pub sub: FieldArtifacts,
    /// Similarity field artifacts
    pub sim: FieldArtifacts,
    /// Serialized docno -> id array
    pub docno_ids: Vec<u8>,
    /// Serialized delete bitset (empty for a fresh segment)
    pub deletes: Vec<u8>,
    /// Serialized docvalues column
    pub docvalues: Vec<u8>,
}

impl SegmentWriteResult {
    /// Compute a checksum over the immutable segment artifacts.
    ///
    /// Algorithm: crc32fast (CRC32). Coverage: both fields' postings, FST
    /// data, and term metadata (bincode), the docno id array, and the
    /// docvalues column. The delete bitset is the one mutable artifact and
    /// is excluded. The manifest checksum MUST match this value for both
    /// flush and merge paths.
    pub fn checksum(&self) -> u64 {
        let mut hasher = Hasher::new();
        for field in [&self.sub, &self.sim] {
            hasher.update(&field.postings);
            hasher.update(&field.fst);
            let meta_bytes = bincode::serialize(&field.meta).unwrap_or_default();
            hasher.update(&meta_bytes);
        }
        hasher.update(&self.docno_ids);
        hasher.update(&self.docvalues);
        hasher.finalize() as u64
    }
}

/// Writer for creating new segments
pub struct SegmentWriter {
    segment_id: SegmentId,
    encoding: TermEncoding,
}

impl SegmentWriter {
    pub fn new(segment_id: SegmentId, encoding: TermEncoding) -> Self {
        Self {
            segment_id,
            encoding,
        }
    }

    /// Write a segment from a mutable buffer.
    ///
    /// Buffered records marked deleted are dropped and the survivors are
    /// renumbered, so a flushed segment starts with zero deletions.
    pub fn write_from_buffer(&self, buffer: &MutableBuffer) -> io::Result<SegmentWriteResult> {
        // Renumber live buffered docnos into the new dense space
        let mut remap: Vec<Option<DocNo>> = vec![None; buffer.doc_count() as usize];
        let mut docno_map = DocNoMap::with_capacity(buffer.doc_count() as usize);
        let mut sim_sizes = Vec::new();

        for (old, (&id, &size)) in buffer.ids().iter().zip(buffer.sim_sizes()).enumerate() {
            if buffer.is_deleted(DocNo::new(old as u32)) {
                continue;
            }
            let new = docno_map.add(id);
            sim_sizes.push(size);
            remap[old] = Some(new);
        }

        let sub = self.build_field_from_map(buffer.sub_postings(), &remap)?;
        let sim = self.build_field_from_map(buffer.sim_postings(), &remap)?;

        self.assemble(docno_map, sim_sizes, sub, sim)
    }

    /// Merge multiple segments into a new segment, dropping deleted records
    pub fn merge_segments(&self, segments: &[&SegmentReader]) -> io::Result<SegmentWriteResult> {
        if segments.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No segments to merge",
            ));
        }

        // Renumber live docs of every input into the merged docno space.
        // Segments are processed in order, so each remap is ascending and
        // concatenated posting lists stay sorted.
        let mut docno_map = DocNoMap::new();
        let mut sim_sizes = Vec::new();
        let mut remaps: Vec<Vec<Option<DocNo>>> = Vec::with_capacity(segments.len());

        for segment in segments {
            let mut remap = vec![None; segment.doc_count() as usize];
            for (old, id) in segment.docno_map().live_docs() {
                let new = docno_map.add(id);
                sim_sizes.push(segment.sim_size(old).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("missing simsz for docno {} in {}", old.as_u32(), segment.id()),
                    )
                })?);
                remap[old.as_usize()] = Some(new);
            }
            remaps.push(remap);
        }

        let sub = merge_field(segments, &remaps, |s| s.sub())?;
        let sim = merge_field(segments, &remaps, |s| s.sim())?;

        self.assemble(docno_map, sim_sizes, sub, sim)
    }

    /// Encode buffered feature postings into term-keyed lists
    fn build_field_from_map(
        &self,
        postings_by_feature: &std::collections::HashMap<u32, Vec<DocNo>>,
        remap: &[Option<DocNo>],
    ) -> io::Result<(FieldArtifacts, FieldReader)> {
        let mut by_term: BTreeMap<Vec<u8>, Vec<DocNo>> = BTreeMap::new();
        for (&feature, docnos) in postings_by_feature {
            let remapped: Vec<DocNo> = docnos
                .iter()
                .filter_map(|d| remap[d.as_usize()])
                .collect();
            if !remapped.is_empty() {
                by_term.insert(self.encoding.encode(feature), remapped);
            }
        }
        build_field(by_term)
    }

    fn assemble(
        &self,
        docno_map: DocNoMap,
        sim_sizes: Vec<u32>,
        sub: (FieldArtifacts, FieldReader),
        sim: (FieldArtifacts, FieldReader),
    ) -> io::Result<SegmentWriteResult> {
        let (sub_artifacts, sub_reader) = sub;
        let (sim_artifacts, sim_reader) = sim;

        let docvalues = DocValuesReader::from_sim_sizes(&sim_sizes);
        let docno_ids = docno_map.serialize_ids();
        let deletes = docno_map.serialize_deletes()?;
        let docvalues_data = docvalues.serialize();

        let size_bytes = (sub_artifacts.postings.len()
            + sub_artifacts.fst.len()
            + sim_artifacts.postings.len()
            + sim_artifacts.fst.len()
            + docno_ids.len()
            + docvalues_data.len()) as u64;

        let doc_count = docno_map.len() as u32;
        let meta = SegmentMeta {
            id: self.segment_id,
            doc_count,
            live_doc_count: docno_map.live_count() as u32,
            size_bytes,
            created_at: current_timestamp(),
        };

        let reader =
            SegmentReader::from_parts(meta, sub_reader, sim_reader, docno_map, docvalues);

        Ok(SegmentWriteResult {
            reader,
            sub: sub_artifacts,
            sim: sim_artifacts,
            docno_ids,
            deletes,
            docvalues: docvalues_data,
        })
    }
}

/// Union one field's posting lists across segments, remapped and re-keyed
fn merge_field<'a, F>(
    segments: &[&'a SegmentReader],
    remaps: &[Vec<Option<DocNo>>],
    field: F,
) -> io::Result<(FieldArtifacts, FieldReader)>
where
    F: Fn(&'a SegmentReader) -> &'a FieldReader,
{
    let mut by_term: BTreeMap<Vec<u8>, Vec<DocNo>> = BTreeMap::new();

    for (seg_idx, segment) in segments.iter().enumerate() {
        let reader = field(segment);
        for (term, meta) in reader.terms().iter_terms() {
            let iter = reader.postings_reader().get_postings(meta)?;
            let list = by_term.entry(term).or_default();
            for old in iter {
                if let Some(new) = remaps[seg_idx][old.as_usize()] {
                    list.push(new);
                }
            }
        }
    }

    by_term.retain(|_, docnos| !docnos.is_empty());
    build_field(by_term)
}

/// Serialize term-keyed posting lists into field artifacts plus a reader
fn build_field(
    by_term: BTreeMap<Vec<u8>, Vec<DocNo>>,
) -> io::Result<(FieldArtifacts, FieldReader)> {
    let mut postings_writer = PostingsWriter::new();
    let mut dict_builder = TermDictionaryBuilder::with_capacity(by_term.len());
    let mut metas = Vec::with_capacity(by_term.len());

    for (term, docnos) in by_term {
        postings_writer.start_posting_list();
        for docno in &docnos {
            postings_writer.add_docno(*docno);
        }
        let meta = postings_writer.finish_posting_list(docnos.len() as u32);
        metas.push(meta.clone());
        dict_builder.add(term, meta);
    }

    let postings_data = postings_writer.into_data();
    let dict = dict_builder.build()?;

    let artifacts = FieldArtifacts {
        postings: postings_data.clone(),
        fst: dict.fst_bytes().to_vec(),
        meta: metas,
    };
    let reader = FieldReader::new(dict, PostingsReader::new(postings_data));
    Ok((artifacts, reader))
}

/// Rebuild a term dictionary from stored artifacts
pub fn field_from_artifacts(
    postings: Vec<u8>,
    fst: Vec<u8>,
    meta: Vec<PostingListMeta>,
) -> io::Result<FieldReader> {
    let dict = TermDictionary::new(fst, meta)?;
    Ok(FieldReader::new(dict, PostingsReader::new(postings)))
}

/// Get current Unix timestamp in seconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
