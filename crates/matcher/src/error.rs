use skinmatch_vector_store::VectorStoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolverError>;

#[derive(Error, Debug)]
pub enum ResolverError {
    /// The embedding model could not be loaded or failed to encode.
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(#[source] VectorStoreError),

    #[error("Similarity index error: {0}")]
    Index(#[source] VectorStoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
