//! Builds the catalog and alias artifacts from per-locale item feeds.
//!
//! Each feed is a JSON object `item_id -> item`. The first locale ingested is
//! the anchor: its primary name for an item id becomes the canonical name,
//! and every name seen for the same id in later locales becomes an alias.

use crate::error::RefreshError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Item fields holding a displayable name, in priority order.
pub const NAME_FIELDS: [&str; 3] = ["market_hash_name", "market_name", "name"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub locale: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(locale: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            url: url.into(),
        }
    }

    /// English first so English names anchor the canonical form.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "en",
                "https://raw.githubusercontent.com/ByMykel/CSGO-API/main/public/api/en/all.json",
            ),
            Self::new(
                "zh-CN",
                "https://raw.githubusercontent.com/ByMykel/CSGO-API/main/public/api/zh-CN/all.json",
            ),
        ]
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshSummary {
    pub names: usize,
    pub aliases: usize,
    pub locales: Vec<String>,
}

#[derive(Serialize)]
struct MappingPayload<'a> {
    #[serde(rename = "alias_to_en")]
    alias_to_canonical: &'a Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct CatalogRefresher {
    anchor_locale: Option<String>,
    locales: Vec<String>,
    names: Vec<String>,
    seen: HashSet<String>,
    primary_by_id: HashMap<String, String>,
    aliases: Map<String, Value>,
}

impl CatalogRefresher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and merge one feed body. Returns the number of items that
    /// contributed at least one name.
    pub fn ingest_feed(&mut self, locale: &str, body: &str) -> Result<usize, RefreshError> {
        let value: Value = serde_json::from_str(body).map_err(|source| RefreshError::Parse {
            locale: locale.to_string(),
            source,
        })?;
        let Value::Object(items) = value else {
            return Err(RefreshError::InvalidFeed {
                locale: locale.to_string(),
            });
        };
        Ok(self.ingest_items(locale, &items))
    }

    pub fn ingest_items(&mut self, locale: &str, items: &Map<String, Value>) -> usize {
        let is_anchor = match &self.anchor_locale {
            Some(anchor) => anchor == locale,
            None => {
                self.anchor_locale = Some(locale.to_string());
                true
            }
        };
        if !self.locales.iter().any(|l| l == locale) {
            self.locales.push(locale.to_string());
        }

        let mut contributed = 0usize;
        for (item_id, item) in items {
            let candidates = item_candidates(item);
            let Some(primary) = candidates.first().cloned() else {
                continue;
            };
            contributed += 1;

            let base_name = if is_anchor {
                self.primary_by_id.insert(item_id.clone(), primary.clone());
                primary
            } else {
                self.primary_by_id
                    .get(item_id)
                    .cloned()
                    .unwrap_or(primary)
            };

            for alias in candidates {
                self.aliases
                    .insert(alias.clone(), Value::String(base_name.clone()));
                if self.seen.insert(alias.clone()) {
                    self.names.push(alias);
                }
            }
        }

        log::info!("Merged {contributed} items from locale '{locale}'");
        contributed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Distinct names in first-seen order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn canonical_for(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).and_then(Value::as_str)
    }

    /// Write both artifacts atomically (temp file + rename).
    pub fn write(
        &self,
        catalog_path: &Path,
        alias_path: &Path,
    ) -> Result<RefreshSummary, RefreshError> {
        if self.names.is_empty() {
            return Err(RefreshError::NoNames);
        }

        write_atomic(catalog_path, self.names.join("\n").as_bytes())?;

        let payload = MappingPayload {
            alias_to_canonical: &self.aliases,
        };
        let json = serde_json::to_vec_pretty(&payload)?;
        write_atomic(alias_path, &json)?;

        log::info!(
            "Wrote {} names to {} and {} aliases to {}",
            self.names.len(),
            catalog_path.display(),
            self.aliases.len(),
            alias_path.display()
        );

        Ok(RefreshSummary {
            names: self.names.len(),
            aliases: self.aliases.len(),
            locales: self.locales.clone(),
        })
    }
}

fn item_candidates(item: &Value) -> Vec<String> {
    let Some(item) = item.as_object() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::with_capacity(NAME_FIELDS.len());
    for field in NAME_FIELDS {
        let Some(raw) = item.get(field).and_then(Value::as_str) else {
            continue;
        };
        let trimmed = raw.trim();
        if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EN: &str = r#"{
        "skin-1": {"market_hash_name": "AK-47 | Redline (Field-Tested)", "name": "AK-47 | Redline"},
        "skin-2": {"market_hash_name": "AWP | Asiimov (Field-Tested)", "market_name": "AWP | Asiimov (Field-Tested)"},
        "agent-1": {"name": "  "},
        "bad": 42
    }"#;

    const ZH: &str = r#"{
        "skin-1": {"market_hash_name": "AK-47 | 红线 (久经沙场)", "name": "AK-47 | 红线"},
        "skin-9": {"name": "仅中文物品"}
    }"#;

    #[test]
    fn anchor_locale_names_become_canonical() {
        let mut refresher = CatalogRefresher::new();
        assert_eq!(refresher.ingest_feed("en", EN).unwrap(), 2);
        assert_eq!(refresher.ingest_feed("zh-CN", ZH).unwrap(), 2);

        assert_eq!(
            refresher.names(),
            &[
                "AK-47 | Redline (Field-Tested)".to_string(),
                "AK-47 | Redline".to_string(),
                "AWP | Asiimov (Field-Tested)".to_string(),
                "AK-47 | 红线 (久经沙场)".to_string(),
                "AK-47 | 红线".to_string(),
                "仅中文物品".to_string(),
            ]
        );
        assert_eq!(
            refresher.canonical_for("AK-47 | 红线"),
            Some("AK-47 | Redline (Field-Tested)")
        );
        assert_eq!(
            refresher.canonical_for("AK-47 | Redline"),
            Some("AK-47 | Redline (Field-Tested)")
        );
        assert_eq!(refresher.canonical_for("仅中文物品"), Some("仅中文物品"));
    }

    #[test]
    fn non_object_feed_is_rejected() {
        let mut refresher = CatalogRefresher::new();
        assert!(matches!(
            refresher.ingest_feed("en", "[]"),
            Err(RefreshError::InvalidFeed { .. })
        ));
        assert!(matches!(
            refresher.ingest_feed("en", "{oops"),
            Err(RefreshError::Parse { .. })
        ));
    }

    #[test]
    fn writing_nothing_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let refresher = CatalogRefresher::new();
        let err = refresher
            .write(&tmp.path().join("a.txt"), &tmp.path().join("b.json"))
            .unwrap_err();
        assert!(matches!(err, RefreshError::NoNames));
        assert!(!tmp.path().join("a.txt").exists());
    }
}
