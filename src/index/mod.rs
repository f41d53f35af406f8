//! Write and read sessions over one on-disk index

mod indexer;
mod session;

pub use indexer::*;
pub use session::*;
