//! Query construction, result aggregation, and pagination

mod collector;
mod cursor;
mod query;

pub use collector::*;
pub use cursor::*;
pub use query::*;
