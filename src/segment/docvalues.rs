//! Stored per-document values
//!
//! One columnar store per segment. The only column this index needs is
//! `simsz`, the cardinality of each document's similarity fingerprint,
//! kept as raw fixed-width bytes and decoded on access so the read side
//! can layer an id/size lookup cache on top.

use std::io;

use super::types::DocNo;

/// Fixed-width numeric column, decoded per access
#[derive(Clone, Debug, Default)]
pub struct DocValuesReader {
    /// 4 little-endian bytes per docno
    sim_sizes: Vec<u8>,
}

impl DocValuesReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sim_sizes(sizes: &[u32]) -> Self {
        let mut sim_sizes = Vec::with_capacity(sizes.len() * 4);
        for &s in sizes {
            sim_sizes.extend_from_slice(&s.to_le_bytes());
        }
        Self { sim_sizes }
    }

    /// Similarity fingerprint cardinality for a docno
    pub fn sim_size(&self, docno: DocNo) -> Option<u32> {
        let start = docno.as_usize().checked_mul(4)?;
        let bytes = self.sim_sizes.get(start..start + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Number of rows in the column
    pub fn len(&self) -> usize {
        self.sim_sizes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.sim_sizes.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.sim_sizes.clone()
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        if data.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "docvalues column length is not a multiple of 4",
            ));
        }
        Ok(Self {
            sim_sizes: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_size_column() {
        let col = DocValuesReader::from_sim_sizes(&[3, 0, 17]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.sim_size(DocNo::new(0)), Some(3));
        assert_eq!(col.sim_size(DocNo::new(1)), Some(0));
        assert_eq!(col.sim_size(DocNo::new(2)), Some(17));
        assert_eq!(col.sim_size(DocNo::new(3)), None);
    }

    #[test]
    fn test_serialization_round_trip() {
        let col = DocValuesReader::from_sim_sizes(&[1, 2, 3]);
        let restored = DocValuesReader::deserialize(&col.serialize()).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.sim_size(DocNo::new(2)), Some(3));
    }

    #[test]
    fn test_deserialize_rejects_misaligned_data() {
        assert!(DocValuesReader::deserialize(&[1, 2, 3]).is_err());
    }
}
