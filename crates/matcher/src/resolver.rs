use crate::config::ResolverConfig;
use crate::error::{ResolverError, Result};
use crate::outcome::{MatchOutcome, MatchResult, Resolution};
use crate::variants::query_variants;
use once_cell::sync::OnceCell;
use serde::Serialize;
use skinmatch_catalog::{AliasMap, CatalogStore, WearCondition};
use skinmatch_vector_store::{
    build_index, EmbeddingCache, EmbeddingConfig, EmbeddingMatrix, EmbeddingModel, IndexKind,
    SimilarityIndex, TextEncoder,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Builds the encoder on first use.
pub type EncoderLoader = Box<
    dyn Fn(&EmbeddingConfig) -> skinmatch_vector_store::Result<Arc<dyn TextEncoder>>
        + Send
        + Sync,
>;

fn default_encoder_loader() -> EncoderLoader {
    Box::new(|config| {
        let model = EmbeddingModel::from_config(config)?;
        Ok(Arc::new(model) as Arc<dyn TextEncoder>)
    })
}

struct SearchState {
    matrix: Arc<EmbeddingMatrix>,
    index: Box<dyn SimilarityIndex>,
    model_id: String,
}

/// Shape of the search state after `warm` / `rebuild`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub rows: usize,
    pub dimension: usize,
    pub index: Option<IndexKind>,
    pub model_id: Option<String>,
}

/// Resolves free-text item queries to canonical catalog names.
///
/// Owns the catalog, the alias map, the encoder and the search state. The
/// encoder and the search state are built on first use and are read-only
/// afterwards; builds and rebuilds are serialized by an init lock, readers
/// only clone an `Arc` under the read lock.
pub struct NameResolver {
    config: ResolverConfig,
    catalog: CatalogStore,
    aliases: AliasMap,
    cache: EmbeddingCache,
    encoder_loader: EncoderLoader,
    encoder: OnceCell<Arc<dyn TextEncoder>>,
    state: RwLock<Option<Arc<SearchState>>>,
    init_lock: Mutex<()>,
}

pub struct NameResolverBuilder {
    config: ResolverConfig,
    catalog: Option<CatalogStore>,
    aliases: Option<AliasMap>,
    encoder: Option<Arc<dyn TextEncoder>>,
    encoder_loader: Option<EncoderLoader>,
}

impl NameResolverBuilder {
    /// Use this catalog instead of reading `catalog_path`.
    #[must_use]
    pub fn catalog(mut self, catalog: CatalogStore) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use this alias map instead of reading `alias_path`.
    #[must_use]
    pub fn aliases(mut self, aliases: AliasMap) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Use a ready encoder; the embedding config is then ignored.
    #[must_use]
    pub fn encoder(mut self, encoder: Arc<dyn TextEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    #[must_use]
    pub fn encoder_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&EmbeddingConfig) -> skinmatch_vector_store::Result<Arc<dyn TextEncoder>>
            + Send
            + Sync
            + 'static,
    {
        self.encoder_loader = Some(Box::new(loader));
        self
    }

    /// Load whatever was not supplied. Never fails: a missing catalog gives
    /// an empty resolver and a missing mapping gives the identity mapping.
    #[must_use]
    pub fn build(self) -> NameResolver {
        let catalog = self
            .catalog
            .unwrap_or_else(|| CatalogStore::load_or_empty(&self.config.catalog_path));
        let aliases = self
            .aliases
            .unwrap_or_else(|| AliasMap::load_or_identity(&self.config.alias_path, &catalog));
        let cache = EmbeddingCache::new(&self.config.cache_path)
            .with_batch_size(self.config.embedding.batch_size);

        let encoder = OnceCell::new();
        if let Some(ready) = self.encoder {
            let _ = encoder.set(ready);
        }

        log::info!(
            "Resolver ready: {} catalog names, {} aliases",
            catalog.len(),
            aliases.len()
        );

        NameResolver {
            encoder_loader: self.encoder_loader.unwrap_or_else(default_encoder_loader),
            config: self.config,
            catalog,
            aliases,
            cache,
            encoder,
            state: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }
}

impl NameResolver {
    #[must_use]
    pub fn builder(config: ResolverConfig) -> NameResolverBuilder {
        NameResolverBuilder {
            config,
            catalog: None,
            aliases: None,
            encoder: None,
            encoder_loader: None,
        }
    }

    #[must_use]
    pub fn from_config(config: ResolverConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    #[must_use]
    pub const fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    /// The encoder, loading it on first call. A failed load is not cached.
    pub fn encoder(&self) -> Result<Arc<dyn TextEncoder>> {
        self.encoder
            .get_or_try_init(|| (self.encoder_loader)(&self.config.embedding))
            .cloned()
            .map_err(ResolverError::ModelUnavailable)
    }

    /// Build (or load) the embedding matrix and index now instead of on the
    /// first query.
    pub fn warm(&self) -> Result<WarmReport> {
        if self.catalog.is_empty() {
            return Ok(Self::empty_report());
        }
        let state = self.search_state(false)?;
        Ok(Self::report(&state))
    }

    /// Re-encode the whole catalog, overwrite the cache and swap the index.
    pub fn rebuild(&self) -> Result<WarmReport> {
        if self.catalog.is_empty() {
            return Ok(Self::empty_report());
        }
        let state = self.search_state(true)?;
        Ok(Self::report(&state))
    }

    /// Whether the search state has been built.
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.state
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Canonical name for `query`, or `None` when nothing clears
    /// `score_cutoff` (percent).
    pub fn find_best_match(&self, query: &str, score_cutoff: u32) -> Result<Option<String>> {
        Ok(self.resolve(query, score_cutoff)?.outcome.into_canonical_name())
    }

    /// `find_best_match` on the blocking thread pool.
    pub async fn find_best_match_async(
        self: Arc<Self>,
        query: String,
        score_cutoff: u32,
    ) -> Result<Option<String>> {
        tokio::task::spawn_blocking(move || self.find_best_match(&query, score_cutoff))
            .await
            .map_err(|e| ResolverError::Task(e.to_string()))?
    }

    pub fn resolve(&self, query: &str, score_cutoff: u32) -> Result<Resolution> {
        let score_cutoff = clamp_cutoff(score_cutoff);
        let wear_hint = WearCondition::detect(query);
        let outcome = self.resolve_outcome(query, score_cutoff)?;
        Ok(Resolution {
            query: query.to_string(),
            score_cutoff,
            outcome,
            wear_hint,
        })
    }

    fn resolve_outcome(&self, query: &str, score_cutoff: u32) -> Result<MatchOutcome> {
        if self.catalog.is_empty() {
            log::debug!("Empty catalog; no match for {query:?}");
            return Ok(MatchOutcome::EmptyCatalog);
        }
        let variants = query_variants(query);
        if variants.is_empty() {
            return Ok(MatchOutcome::EmptyQuery);
        }

        let threshold = score_cutoff as f32 / 100.0;
        let state = self.search_state(false)?;
        let encoder = self.encoder()?;
        let started = Instant::now();

        let mut best: Option<(usize, f32, usize)> = None;
        for (variant_idx, variant) in variants.iter().enumerate() {
            let vector = encoder
                .encode(variant)
                .map_err(ResolverError::ModelUnavailable)?;
            let hits = state
                .index
                .search(&vector, self.config.top_k.max(1))
                .map_err(ResolverError::Index)?;
            let Some(&(row, score)) = hits.first() else {
                continue;
            };
            log::debug!("Variant {variant:?}: top row {row} score {score:.4}");

            if best.map_or(true, |(_, best_score, _)| score > best_score) {
                best = Some((row, score, variant_idx));
            }
            // First variant to clear the cutoff wins, even if a later one
            // would score higher.
            if score >= threshold {
                break;
            }
        }

        let Some((row, score, variant_idx)) = best else {
            return Ok(MatchOutcome::NoCandidates);
        };
        let catalog_name = self.catalog.name(row).unwrap_or_default().to_string();
        let result = MatchResult {
            query_variant_used: variants[variant_idx].clone(),
            candidate_index: row,
            similarity_score: score,
            canonical_name: self.aliases.resolve(&catalog_name).to_string(),
            catalog_name,
        };

        log::debug!(
            "Resolved {query:?} -> {:?} ({:.4} vs threshold {threshold:.2}) in {:.2?}",
            result.canonical_name,
            score,
            started.elapsed()
        );

        if score < threshold {
            Ok(MatchOutcome::BelowThreshold { best: result })
        } else {
            Ok(MatchOutcome::Matched(result))
        }
    }

    fn search_state(&self, force_rebuild: bool) -> Result<Arc<SearchState>> {
        if !force_rebuild {
            if let Some(state) = self.current_state() {
                return Ok(state);
            }
        }

        let _guard = self
            .init_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !force_rebuild {
            if let Some(state) = self.current_state() {
                return Ok(state);
            }
        }

        let encoder = self.encoder()?;
        let matrix = self
            .cache
            .ensure(self.catalog.names(), encoder.as_ref(), force_rebuild)
            .map_err(ResolverError::ModelUnavailable)?;
        let matrix = Arc::new(matrix);
        let index = build_index(matrix.clone(), self.config.index.backend);
        let state = Arc::new(SearchState {
            matrix,
            index,
            model_id: encoder.model_id().to_string(),
        });

        let mut slot = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(state.clone());
        Ok(state)
    }

    fn current_state(&self) -> Option<Arc<SearchState>> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn report(state: &SearchState) -> WarmReport {
        WarmReport {
            rows: state.matrix.rows(),
            dimension: state.matrix.dimension(),
            index: Some(state.index.kind()),
            model_id: Some(state.model_id.clone()),
        }
    }

    const fn empty_report() -> WarmReport {
        WarmReport {
            rows: 0,
            dimension: 0,
            index: None,
            model_id: None,
        }
    }
}

fn clamp_cutoff(score_cutoff: u32) -> u32 {
    if score_cutoff > 100 {
        log::warn!("score_cutoff {score_cutoff} is above 100; using 100");
        100
    } else {
        score_cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skinmatch_vector_store::{IndexBackend, VectorStoreError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Encoder answering from a fixed table and counting its work.
    struct FixedEncoder {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
        texts: Mutex<Vec<String>>,
    }

    impl FixedEncoder {
        fn new(pairs: &[(&str, [f32; 2])]) -> Arc<Self> {
            Arc::new(Self {
                vectors: pairs
                    .iter()
                    .map(|(text, v)| ((*text).to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
                texts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }
    }

    impl TextEncoder for FixedEncoder {
        fn model_id(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn encode_batch(&self, texts: &[String]) -> skinmatch_vector_store::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.lock().unwrap().extend(texts.iter().cloned());
            texts
                .iter()
                .map(|text| {
                    self.vectors.get(text).cloned().ok_or_else(|| {
                        VectorStoreError::EmbeddingError(format!("no vector for {text:?}"))
                    })
                })
                .collect()
        }
    }

    fn table() -> Arc<FixedEncoder> {
        FixedEncoder::new(&[
            ("Row A", [1.0, 0.0]),
            ("Row B", [0.0, 1.0]),
            ("foo", [0.6, 0.8]),
            ("FOO", [1.0, 0.0]),
            ("bar", [0.6, 0.8]),
            ("BAR", [0.8, 0.6]),
        ])
    }

    fn resolver(dir: &TempDir, encoder: Arc<FixedEncoder>) -> NameResolver {
        let config = ResolverConfig::for_data_dir(dir.path());
        NameResolver::builder(config)
            .catalog(CatalogStore::from_names(["Row A", "Row B"]))
            .encoder(encoder)
            .build()
    }

    #[test]
    fn blank_query_never_touches_the_model() {
        let dir = TempDir::new().unwrap();
        let encoder = table();
        let resolver = resolver(&dir, encoder.clone());

        assert_eq!(resolver.find_best_match("", 50).unwrap(), None);
        assert_eq!(resolver.find_best_match("   ", 0).unwrap(), None);
        assert_eq!(encoder.calls(), 0);
        assert!(!resolver.is_warm());
        assert!(!resolver.config().cache_path.exists());
    }

    #[test]
    fn empty_catalog_never_touches_the_model() {
        let dir = TempDir::new().unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let resolver = NameResolver::builder(ResolverConfig::for_data_dir(dir.path()))
            .encoder_loader(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VectorStoreError::EmbeddingError("should not load".into()))
            })
            .build();

        assert!(resolver.catalog().is_empty());
        let resolution = resolver.resolve("ak47 redline", 0).unwrap();
        assert_eq!(resolution.outcome, MatchOutcome::EmptyCatalog);
        assert_eq!(resolver.warm().unwrap().rows, 0);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn early_exit_keeps_first_variant_that_clears_cutoff() {
        let dir = TempDir::new().unwrap();
        let encoder = table();
        let resolver = resolver(&dir, encoder.clone());

        let resolution = resolver.resolve("FOO", 50).unwrap();
        let best = resolution.outcome.best().unwrap();
        assert_eq!(best.canonical_name, "Row B");
        assert_eq!(best.query_variant_used, "foo");
        assert!(!encoder.seen().contains(&"FOO".to_string()));

        // With a higher bar the lowercase variant falls short and the
        // original form gets its turn.
        let resolution = resolver.resolve("FOO", 90).unwrap();
        let best = resolution.outcome.best().unwrap();
        assert!(resolution.outcome.is_match());
        assert_eq!(best.canonical_name, "Row A");
        assert_eq!(best.query_variant_used, "FOO");
    }

    #[test]
    fn equal_scores_across_variants_keep_the_earlier_one() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, table());

        let resolution = resolver.resolve("BAR", 95).unwrap();
        let MatchOutcome::BelowThreshold { best } = resolution.outcome else {
            panic!("expected below-threshold outcome");
        };
        assert_eq!(best.query_variant_used, "bar");
        assert_eq!(best.catalog_name, "Row B");
    }

    #[test]
    fn below_threshold_is_not_a_match() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, table());
        assert_eq!(resolver.find_best_match("foo", 90).unwrap(), None);
        assert_eq!(
            resolver.find_best_match("foo", 75).unwrap().as_deref(),
            Some("Row B")
        );
    }

    #[test]
    fn cutoff_above_hundred_is_clamped() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, table());
        let resolution = resolver.resolve("foo", 250).unwrap();
        assert_eq!(resolution.score_cutoff, 100);
        assert!(!resolution.outcome.is_match());
    }

    #[test]
    fn aliases_are_applied_to_the_match() {
        let dir = TempDir::new().unwrap();
        let catalog = CatalogStore::from_names(["Row A", "Row B"]);
        let aliases = AliasMap::from_entries(
            [("Row B".to_string(), "Canonical B".to_string())],
            &catalog,
        );
        let resolver = NameResolver::builder(ResolverConfig::for_data_dir(dir.path()))
            .catalog(catalog)
            .aliases(aliases)
            .encoder(table())
            .build();

        let resolution = resolver.resolve("foo", 50).unwrap();
        let best = resolution.outcome.best().unwrap();
        assert_eq!(best.catalog_name, "Row B");
        assert_eq!(best.canonical_name, "Canonical B");
    }

    #[test]
    fn model_failure_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let resolver = NameResolver::builder(ResolverConfig::for_data_dir(dir.path()))
            .catalog(CatalogStore::from_names(["Row A"]))
            .encoder_loader(|_| Err(VectorStoreError::EmbeddingError("no model".into())))
            .build();

        let err = resolver.find_best_match("row a", 50).unwrap_err();
        assert!(matches!(err, ResolverError::ModelUnavailable(_)));
    }

    #[test]
    fn failed_encoder_load_is_retried() {
        let dir = TempDir::new().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let resolver = NameResolver::builder(ResolverConfig::for_data_dir(dir.path()))
            .catalog(CatalogStore::from_names(["Row A", "Row B"]))
            .encoder_loader(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(VectorStoreError::EmbeddingError("warming up".into()))
                } else {
                    Ok(table() as Arc<dyn TextEncoder>)
                }
            })
            .build();

        assert!(resolver.warm().is_err());
        let report = resolver.warm().unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.model_id.as_deref(), Some("fixed"));
        resolver.find_best_match("foo", 50).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn index_is_built_once_and_rebuild_recomputes() {
        let dir = TempDir::new().unwrap();
        let encoder = table();
        let resolver = resolver(&dir, encoder.clone());

        let report = resolver.warm().unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.dimension, 2);
        resolver.warm().unwrap();
        resolver.find_best_match("foo", 50).unwrap();
        let catalog_encodes = |seen: Vec<String>| seen.iter().filter(|t| *t == "Row A").count();
        assert_eq!(catalog_encodes(encoder.seen()), 1);

        resolver.rebuild().unwrap();
        assert_eq!(catalog_encodes(encoder.seen()), 2);
    }

    #[test]
    fn brute_force_backend_gives_same_answers() {
        let dir = TempDir::new().unwrap();
        let mut config = ResolverConfig::for_data_dir(dir.path());
        config.index.backend = IndexBackend::Brute;
        let resolver = NameResolver::builder(config)
            .catalog(CatalogStore::from_names(["Row A", "Row B"]))
            .encoder(table())
            .build();

        assert_eq!(resolver.warm().unwrap().index, Some(IndexKind::BruteForce));
        assert_eq!(
            resolver.find_best_match("FOO", 90).unwrap().as_deref(),
            Some("Row A")
        );
    }

    #[test]
    fn concurrent_first_queries_build_once() {
        let dir = TempDir::new().unwrap();
        let encoder = table();
        let resolver = Arc::new(resolver(&dir, encoder.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                std::thread::spawn(move || resolver.find_best_match("foo", 50).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().as_deref(), Some("Row B"));
        }
        let seen = encoder.seen();
        assert_eq!(seen.iter().filter(|t| *t == "Row A").count(), 1);
    }

    #[tokio::test]
    async fn async_adapter_matches_sync_result() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(resolver(&dir, table()));
        let answer = resolver
            .clone()
            .find_best_match_async("foo".to_string(), 50)
            .await
            .unwrap();
        assert_eq!(answer, resolver.find_best_match("foo", 50).unwrap());
    }
}
