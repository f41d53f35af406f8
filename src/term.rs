//! Feature-id term encoding
//!
//! Fingerprint feature ids are stored in the term dictionary under one of
//! two interchangeable encodings, chosen per deployment:
//! - `Text`: a fixed 6-character token over a 64-symbol alphabet (6-bit
//!   groups, least-significant group first; covers the full 32-bit range)
//! - `Points`: the feature id as a fixed-width 4-byte big-endian key, so
//!   numeric order equals byte order

use serde::{Deserialize, Serialize};

use crate::error::{MolScreenError, Result};

/// 64-symbol alphabet for text tokens, indexed by 6-bit group value
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Token length for text-encoded feature ids (6 groups of 6 bits >= 32 bits)
pub const TEXT_TOKEN_LEN: usize = 6;

/// How feature ids are written into the term dictionary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermEncoding {
    /// 6-character tokens over a 64-symbol alphabet
    Text,
    /// Numeric points: 4-byte big-endian keys
    Points,
}

impl TermEncoding {
    /// Encode a feature id into its term dictionary key
    pub fn encode(&self, feature: u32) -> Vec<u8> {
        match self {
            TermEncoding::Text => {
                let mut token = Vec::with_capacity(TEXT_TOKEN_LEN);
                let mut v = feature;
                for _ in 0..TEXT_TOKEN_LEN {
                    token.push(ALPHABET[(v & 0x3F) as usize]);
                    v >>= 6;
                }
                token
            }
            TermEncoding::Points => feature.to_be_bytes().to_vec(),
        }
    }

    /// Decode a term dictionary key back into a feature id
    pub fn decode(&self, term: &[u8]) -> Result<u32> {
        match self {
            TermEncoding::Text => {
                if term.len() != TEXT_TOKEN_LEN {
                    return Err(MolScreenError::Corruption(format!(
                        "text term has length {}, expected {}",
                        term.len(),
                        TEXT_TOKEN_LEN
                    )));
                }
                let mut value: u64 = 0;
                for (i, &symbol) in term.iter().enumerate() {
                    let group = symbol_value(symbol).ok_or_else(|| {
                        MolScreenError::Corruption(format!(
                            "invalid symbol {:#04x} in text term",
                            symbol
                        ))
                    })?;
                    value |= (group as u64) << (6 * i);
                }
                if value > u32::MAX as u64 {
                    return Err(MolScreenError::Corruption(format!(
                        "text term decodes to {} which exceeds the feature id range",
                        value
                    )));
                }
                Ok(value as u32)
            }
            TermEncoding::Points => {
                let bytes: [u8; 4] = term.try_into().map_err(|_| {
                    MolScreenError::Corruption(format!(
                        "points term has length {}, expected 4",
                        term.len()
                    ))
                })?;
                Ok(u32::from_be_bytes(bytes))
            }
        }
    }
}

fn symbol_value(symbol: u8) -> Option<u8> {
    match symbol {
        b'A'..=b'Z' => Some(symbol - b'A'),
        b'a'..=b'z' => Some(symbol - b'a' + 26),
        b'0'..=b'9' => Some(symbol - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}
