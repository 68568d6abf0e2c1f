use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// The persisted matrix cannot be used for the current catalog or model.
    #[error("Embedding cache invalid: {0}")]
    CacheInvalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}
