use crate::error::{CatalogError, Result};
use std::path::Path;

/// Ordered list of known item names.
///
/// The position of a name is its row in the embedding matrix and the id used
/// by the similarity index, so the order is never changed after load.
/// Duplicates are tolerated and simply become separate rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStore {
    names: Vec<String>,
}

impl CatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from in-memory names, applying the same trimming rules
    /// as the file loader.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .filter_map(|name| {
                let trimmed = name.as_ref().trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect();
        Self { names }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CatalogError::Missing(path.to_path_buf())
            } else {
                CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let store = Self::from_names(raw.lines());
        if store.is_empty() {
            log::warn!("Catalog {} is empty", path.display());
        } else {
            log::info!("Loaded {} catalog names from {}", store.len(), path.display());
        }
        Ok(store)
    }

    /// Load the catalog, degrading to an empty store on any failure.
    ///
    /// An empty store makes every resolution a no-match.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(store) => store,
            Err(err) => {
                log::warn!("{err}; continuing with an empty catalog");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn load_trims_and_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("skin_list.txt");
        std::fs::write(
            &path,
            "  AK-47 | Redline (Field-Tested)  \n\n\t\nAWP | Asiimov (Field-Tested)\r\n",
        )
        .unwrap();

        let store = CatalogStore::load(&path).unwrap();
        assert_eq!(
            store.names(),
            &[
                "AK-47 | Redline (Field-Tested)".to_string(),
                "AWP | Asiimov (Field-Tested)".to_string(),
            ]
        );
    }

    #[test]
    fn duplicates_become_separate_rows() {
        let store = CatalogStore::from_names(["Sticker", "Case", "Sticker"]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.name(0), Some("Sticker"));
        assert_eq!(store.name(2), Some("Sticker"));
    }

    #[test]
    fn missing_file_is_reported_and_soft_loader_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope.txt");

        assert!(matches!(
            CatalogStore::load(&path),
            Err(CatalogError::Missing(_))
        ));
        assert!(CatalogStore::load_or_empty(&path).is_empty());
    }

    #[test]
    fn empty_file_loads_as_empty_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("skin_list.txt");
        std::fs::write(&path, "\n  \n").unwrap();

        let store = CatalogStore::load(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.name(0), None);
    }
}
