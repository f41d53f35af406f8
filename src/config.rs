use serde::{Deserialize, Serialize};

use crate::term::TermEncoding;

/// Index settings configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSettings {
    pub encoding: TermEncoding,
    pub balancer: BalancerConfig,
    pub buffer: BufferConfig,
    pub lookup_cache: LookupCacheMode,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            encoding: TermEncoding::Text,
            balancer: BalancerConfig::default(),
            buffer: BufferConfig::default(),
            lookup_cache: LookupCacheMode::Eager,
        }
    }
}

/// Configuration for the segment merge balancer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Target number of segments after balancing
    pub target_segments: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self { target_segments: 8 }
    }
}

/// Configuration for write-buffer flush triggers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Flush to a pending segment when buffered document count exceeds this
    pub max_docs: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            // 50k molecules per flush
            max_docs: 50_000,
        }
    }
}

/// How the per-view id/size lookup tables are populated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupCacheMode {
    /// No tables; decode from the segment on every access
    Disabled,
    /// Scan each segment once at open and fill the tables up front
    Eager,
    /// Sentinel-initialize the tables and fill each slot on first access
    Lazy,
}
