//! molscreen - candidate retrieval and ranking core for chemical
//! structure search
//!
//! Given a molecule's precomputed fingerprint (a set of small integer
//! feature ids), this library answers two questions against a persistent
//! segmented index:
//! - substructure screening: which stored molecules carry every required
//!   feature (a sound conjunctive pre-filter for an external verifier)
//! - similarity search: the top-K stored molecules by Tanimoto
//!   coefficient over a second fingerprint
//!
//! The index is appended incrementally by a single-writer [`Indexer`],
//! kept balanced by a segment merge policy, and served to concurrent
//! readers through hot-swappable [`SearchSession`] views. No chemistry
//! happens here; fingerprints arrive from an external encoder and exact
//! match verification happens downstream.

pub mod config;
pub mod error;
pub mod index;
pub mod search;
pub mod segment;
pub mod term;

pub use config::{BalancerConfig, BufferConfig, IndexSettings, LookupCacheMode};
pub use error::{MolScreenError, Result};
pub use index::{Indexer, SearchSession, SearchView};
pub use search::{PaginatedCursor, tanimoto};
pub use segment::{
    HitScore, MoleculeId, MoleculeRecord, ScoredHit, SegmentId, SegmentMergeBalancer,
};
pub use term::TermEncoding;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
