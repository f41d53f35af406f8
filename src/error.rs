use thiserror::Error;

/// Main error type for molscreen operations
#[derive(Error, Debug)]
pub enum MolScreenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Index corruption: {0}")]
    Corruption(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Index at {0:?} is already opened by another writer")]
    WriterLocked(std::path::PathBuf),

    #[error("Encoding mismatch: index uses {index:?}, settings request {requested:?}")]
    EncodingMismatch {
        index: crate::term::TermEncoding,
        requested: crate::term::TermEncoding,
    },

    #[error("No index view is open")]
    NoViewOpen,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for molscreen operations
pub type Result<T> = std::result::Result<T, MolScreenError>;

impl MolScreenError {
    /// Check if this error indicates corrupt on-disk state rather than
    /// a caller mistake
    pub fn is_corruption(&self) -> bool {
        matches!(self, MolScreenError::Corruption(_))
    }
}
