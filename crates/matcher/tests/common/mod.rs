#![allow(dead_code)]

use skinmatch_catalog::{AliasMap, CatalogStore};
use skinmatch_matcher::{NameResolver, ResolverConfig};
use skinmatch_vector_store::{Result, TextEncoder};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ALPHABET: usize = 36;

/// Character-bigram counts over `[a-z0-9]`, one slot per bigram.
///
/// Bigrams are taken inside alphanumeric runs only, so "AK-47" contributes
/// `ak` and `47`. Similar spellings share bigrams, which is enough to make
/// the examples in the tests meaningful without a real model.
#[derive(Default)]
pub struct BigramEncoder {
    texts: AtomicUsize,
}

impl BigramEncoder {
    pub const DIMENSION: usize = ALPHABET * ALPHABET;

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of strings encoded so far.
    pub fn encoded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; ALPHABET * ALPHABET];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let slots: Vec<usize> = token.chars().filter_map(slot).collect();
            for pair in slots.windows(2) {
                out[pair[0] * ALPHABET + pair[1]] += 1.0;
            }
        }
        out
    }
}

fn slot(c: char) -> Option<usize> {
    match c {
        'a'..='z' => Some(c as usize - 'a' as usize),
        '0'..='9' => Some(26 + c as usize - '0' as usize),
        _ => None,
    }
}

impl TextEncoder for BigramEncoder {
    fn model_id(&self) -> &str {
        "bigram"
    }

    fn dimension(&self) -> usize {
        ALPHABET * ALPHABET
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

pub const AK: &str = "AK-47 | Redline (Field-Tested)";
pub const AWP: &str = "AWP | Asiimov (Field-Tested)";

pub fn example_catalog() -> CatalogStore {
    CatalogStore::from_names([AK, AWP])
}

pub fn resolver_with(
    data_dir: &Path,
    catalog: CatalogStore,
    aliases: Option<AliasMap>,
    encoder: Arc<BigramEncoder>,
) -> NameResolver {
    let aliases = aliases.unwrap_or_else(|| AliasMap::identity(&catalog));
    NameResolver::builder(ResolverConfig::for_data_dir(data_dir))
        .catalog(catalog)
        .aliases(aliases)
        .encoder(encoder)
        .build()
}

pub fn write_catalog(data_dir: &Path, names: &[&str]) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(data_dir.join("skin_list.txt"), names.join("\n")).unwrap();
}
