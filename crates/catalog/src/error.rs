use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog artifact not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read catalog artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum AliasError {
    #[error("Alias mapping not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read alias mapping {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed alias mapping {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Alias mapping {0} is not a JSON object")]
    NotAnObject(PathBuf),
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Feed '{locale}' is not a JSON object of items")]
    InvalidFeed { locale: String },

    #[error("Feed '{locale}' could not be parsed: {source}")]
    Parse {
        locale: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No item names were collected from any feed")]
    NoNames,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
