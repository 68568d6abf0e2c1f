use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use skinmatch_vector_store::paths::{
    DEFAULT_ALIAS_FILE, DEFAULT_CACHE_FILE, DEFAULT_CATALOG_FILE, DEFAULT_DATA_DIR,
};
use skinmatch_vector_store::{EmbeddingConfig, IndexBackend};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file looked up in the working directory when none is given.
pub const CONFIG_FILE_NAME: &str = "skinmatch.toml";

/// Percentage cutoff used when the caller does not pass one.
pub const DEFAULT_SCORE_CUTOFF: u32 = 50;

pub const DEFAULT_TOP_K: usize = 3;

/// Resolver configuration: artifact locations, defaults for matching and
/// the embedding/index setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Line-delimited catalog names
    pub catalog_path: PathBuf,

    /// Alias mapping JSON
    pub alias_path: PathBuf,

    /// Persisted embedding matrix
    pub cache_path: PathBuf,

    /// Default cutoff in percent
    pub score_cutoff: u32,

    /// Candidates fetched per query variant
    pub top_k: usize,

    pub embedding: EmbeddingConfig,

    pub index: IndexConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::for_data_dir(Path::new(DEFAULT_DATA_DIR))
    }
}

impl ResolverConfig {
    /// Defaults with every artifact under `data_dir`.
    #[must_use]
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILE),
            alias_path: data_dir.join(DEFAULT_ALIAS_FILE),
            cache_path: data_dir.join(DEFAULT_CACHE_FILE),
            score_cutoff: DEFAULT_SCORE_CUTOFF,
            top_k: DEFAULT_TOP_K,
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
        }
    }

    /// Load configuration: an explicit file must exist, otherwise
    /// `skinmatch.toml` in the working directory is used when present.
    /// Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(CONFIG_FILE_NAME);
                if path.is_file() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Re-root the three artifact paths under `data_dir`.
    pub fn set_data_dir(&mut self, data_dir: &Path) {
        self.catalog_path = data_dir.join(DEFAULT_CATALOG_FILE);
        self.alias_path = data_dir.join(DEFAULT_ALIAS_FILE);
        self.cache_path = data_dir.join(DEFAULT_CACHE_FILE);
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `SKINMATCH_*` overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = get("SKINMATCH_DATA_DIR") {
            self.set_data_dir(Path::new(&dir));
        }
        if let Some(mode) = get("SKINMATCH_EMBEDDING_MODE") {
            self.embedding.mode = parse_value("SKINMATCH_EMBEDDING_MODE", &mode)?;
        }
        if let Some(model) = get("SKINMATCH_EMBEDDING_MODEL") {
            self.embedding.model = model.trim().to_string();
        }
        if let Some(dir) = get("SKINMATCH_MODEL_DIR") {
            self.embedding.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(device) = get("SKINMATCH_DEVICE") {
            self.embedding.device = parse_value("SKINMATCH_DEVICE", &device)?;
        }
        if let Some(backend) = get("SKINMATCH_INDEX_BACKEND") {
            self.index.backend = parse_value("SKINMATCH_INDEX_BACKEND", &backend)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "top_k".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedding.batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "embedding.model".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a setting with its `FromStr` impl, naming the key on failure.
pub fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|reason| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    })
}
