use crate::error::AliasError;
use crate::store::CatalogStore;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Key under which the refresh job nests the mapping.
pub const ALIAS_SECTION_KEY: &str = "alias_to_en";

/// Alias → canonical name table.
///
/// Every catalog name resolves at least to itself; explicit entries from the
/// mapping artifact take priority over the identity default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    alias_to_canonical: HashMap<String, String>,
}

impl AliasMap {
    /// Identity mapping over the catalog.
    #[must_use]
    pub fn identity(catalog: &CatalogStore) -> Self {
        let mut map = Self::default();
        map.fill_identity(catalog);
        map
    }

    /// Merge explicit entries with identity entries for the catalog.
    pub fn from_entries<I>(entries: I, catalog: &CatalogStore) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = Self {
            alias_to_canonical: entries.into_iter().collect(),
        };
        map.fill_identity(catalog);
        map
    }

    pub fn load(path: impl AsRef<Path>, catalog: &CatalogStore) -> Result<Self, AliasError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                AliasError::Missing(path.to_path_buf())
            } else {
                AliasError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|source| AliasError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        let Value::Object(object) = value else {
            return Err(AliasError::NotAnObject(path.to_path_buf()));
        };

        let entries = extract_entries(object);
        log::info!(
            "Loaded {} alias entries from {}",
            entries.len(),
            path.display()
        );
        Ok(Self::from_entries(entries, catalog))
    }

    /// Load the mapping artifact, degrading to identity over the catalog when
    /// it is missing or unusable.
    pub fn load_or_identity(path: impl AsRef<Path>, catalog: &CatalogStore) -> Self {
        match Self::load(path, catalog) {
            Ok(map) => map,
            Err(AliasError::Missing(path)) => {
                log::info!(
                    "No alias mapping at {}; using identity mapping",
                    path.display()
                );
                Self::identity(catalog)
            }
            Err(err) => {
                log::warn!("{err}; falling back to identity mapping");
                Self::identity(catalog)
            }
        }
    }

    /// Canonical name for `name`, or `name` itself when it is unknown.
    #[must_use]
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.alias_to_canonical
            .get(name)
            .map_or(name, String::as_str)
    }

    #[must_use]
    pub fn is_identity_for(&self, name: &str) -> bool {
        self.resolve(name) == name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alias_to_canonical.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alias_to_canonical.is_empty()
    }

    fn fill_identity(&mut self, catalog: &CatalogStore) {
        for name in catalog.iter() {
            if !self.alias_to_canonical.contains_key(name) {
                self.alias_to_canonical
                    .insert(name.to_string(), name.to_string());
            }
        }
    }
}

fn extract_entries(mut object: Map<String, Value>) -> Vec<(String, String)> {
    let section = match object.remove(ALIAS_SECTION_KEY) {
        Some(Value::Object(nested)) => nested,
        Some(other) => {
            // Not the nested shape; keep the key so the flat reading sees it.
            object.insert(ALIAS_SECTION_KEY.to_string(), other);
            object
        }
        None => object,
    };

    section
        .into_iter()
        .filter_map(|(alias, canonical)| match canonical {
            Value::String(canonical) => Some((alias, canonical)),
            other => {
                log::debug!("Skipping non-string alias target for '{alias}': {other}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn catalog() -> CatalogStore {
        CatalogStore::from_names([
            "AK-47 | Redline (Field-Tested)",
            "AK-47 | 红线 (久经沙场)",
            "AWP | Asiimov (Field-Tested)",
        ])
    }

    #[test]
    fn nested_shape_maps_aliases_and_fills_identity() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("skin_name_mapping.json");
        std::fs::write(
            &path,
            r#"{"alias_to_en": {"AK-47 | 红线 (久经沙场)": "AK-47 | Redline (Field-Tested)"}}"#,
        )
        .unwrap();

        let map = AliasMap::load(&path, &catalog()).unwrap();
        assert_eq!(
            map.resolve("AK-47 | 红线 (久经沙场)"),
            "AK-47 | Redline (Field-Tested)"
        );
        assert_eq!(
            map.resolve("AWP | Asiimov (Field-Tested)"),
            "AWP | Asiimov (Field-Tested)"
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn flat_shape_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("map.json");
        std::fs::write(&path, r#"{"Old Name": "AWP | Asiimov (Field-Tested)", "n": 5}"#).unwrap();

        let map = AliasMap::load(&path, &catalog()).unwrap();
        assert_eq!(map.resolve("Old Name"), "AWP | Asiimov (Field-Tested)");
        assert_eq!(map.resolve("n"), "n");
    }

    #[test]
    fn explicit_entry_wins_over_identity() {
        let map = AliasMap::from_entries(
            [(
                "AWP | Asiimov (Field-Tested)".to_string(),
                "AWP | Asiimov (FT)".to_string(),
            )],
            &catalog(),
        );
        assert_eq!(map.resolve("AWP | Asiimov (Field-Tested)"), "AWP | Asiimov (FT)");
        assert!(!map.is_identity_for("AWP | Asiimov (Field-Tested)"));
    }

    #[test]
    fn malformed_or_missing_mapping_falls_back_to_identity() {
        let tmp = TempDir::new().unwrap();
        let broken = tmp.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        let array = tmp.path().join("array.json");
        std::fs::write(&array, "[1, 2]").unwrap();

        assert!(matches!(
            AliasMap::load(&broken, &catalog()),
            Err(AliasError::Malformed { .. })
        ));
        assert!(matches!(
            AliasMap::load(&array, &catalog()),
            Err(AliasError::NotAnObject(_))
        ));

        let expected = AliasMap::identity(&catalog());
        assert_eq!(AliasMap::load_or_identity(&broken, &catalog()), expected);
        assert_eq!(AliasMap::load_or_identity(&array, &catalog()), expected);
        assert_eq!(
            AliasMap::load_or_identity(tmp.path().join("missing.json"), &catalog()),
            expected
        );
    }

    #[test]
    fn unknown_input_resolves_to_itself() {
        let map = AliasMap::identity(&catalog());
        assert_eq!(map.resolve("M4A4 | Howl"), "M4A4 | Howl");
    }
}
