use crate::brute_force::BruteForceIndex;
use crate::error::Result;
use crate::matrix::EmbeddingMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

/// Nearest-neighbour search over the catalog embedding matrix.
///
/// Results hold at most `k` `(row, score)` pairs, score descending, equal
/// scores ordered by ascending row.
pub trait SimilarityIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    fn kind(&self) -> IndexKind;

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>>;
}

/// Implementation actually serving searches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    FlatIp,
    BruteForce,
}

impl IndexKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlatIp => "flat_ip",
            Self::BruteForce => "brute_force",
        }
    }
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested index implementation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Auto,
    Flat,
    Brute,
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "flat" | "flat_ip" => Ok(Self::Flat),
            "brute" | "brute_force" => Ok(Self::Brute),
            other => Err(format!(
                "unsupported index backend '{other}' (expected auto, flat or brute)"
            )),
        }
    }
}

/// Whether the accelerated index was compiled in.
#[must_use]
pub const fn accelerated_available() -> bool {
    cfg!(feature = "accelerated-index")
}

pub fn build_index(
    matrix: Arc<EmbeddingMatrix>,
    backend: IndexBackend,
) -> Box<dyn SimilarityIndex> {
    let index: Box<dyn SimilarityIndex> = match backend {
        IndexBackend::Brute => Box::new(BruteForceIndex::new(matrix)),
        IndexBackend::Auto | IndexBackend::Flat => accelerated_or_fallback(matrix, backend),
    };
    log::info!(
        "Similarity index ready: {} ({} rows, dim {})",
        index.kind(),
        index.len(),
        index.dimension()
    );
    index
}

#[cfg(feature = "accelerated-index")]
fn accelerated_or_fallback(
    matrix: Arc<EmbeddingMatrix>,
    _backend: IndexBackend,
) -> Box<dyn SimilarityIndex> {
    Box::new(crate::flat_ip::FlatIpIndex::new(matrix))
}

#[cfg(not(feature = "accelerated-index"))]
fn accelerated_or_fallback(
    matrix: Arc<EmbeddingMatrix>,
    backend: IndexBackend,
) -> Box<dyn SimilarityIndex> {
    if backend == IndexBackend::Flat {
        log::warn!("Accelerated index not compiled in; using brute-force search");
    }
    Box::new(BruteForceIndex::new(matrix))
}

/// Ranking order shared by every index.
pub(crate) fn compare_hits(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matrix() -> Arc<EmbeddingMatrix> {
        Arc::new(
            EmbeddingMatrix::from_rows(
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                    vec![1.0, 0.0, 0.0],
                ],
                3,
            )
            .unwrap(),
        )
    }

    #[test]
    fn backend_parses() {
        assert_eq!("AUTO".parse::<IndexBackend>(), Ok(IndexBackend::Auto));
        assert_eq!("flat_ip".parse::<IndexBackend>(), Ok(IndexBackend::Flat));
        assert_eq!("brute".parse::<IndexBackend>(), Ok(IndexBackend::Brute));
        assert!("hnsw".parse::<IndexBackend>().is_err());
    }

    #[test]
    fn brute_backend_is_always_honoured() {
        let index = build_index(matrix(), IndexBackend::Brute);
        assert_eq!(index.kind(), IndexKind::BruteForce);
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn auto_picks_accelerated_when_compiled_in() {
        let index = build_index(matrix(), IndexBackend::Auto);
        let expected = if accelerated_available() {
            IndexKind::FlatIp
        } else {
            IndexKind::BruteForce
        };
        assert_eq!(index.kind(), expected);
    }

    #[test]
    fn both_indexes_rank_identically() {
        let queries = [
            vec![1.0, 0.0, 0.0],
            vec![0.2, 0.9, 0.1],
            vec![0.5, 0.5, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let flat = build_index(matrix(), IndexBackend::Flat);
        let brute = build_index(matrix(), IndexBackend::Brute);
        for query in &queries {
            let a = flat.search(query, 3).unwrap();
            let b = brute.search(query, 3).unwrap();
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(&b) {
                assert_eq!(x.0, y.0, "query {query:?}");
                assert!((x.1 - y.1).abs() < 1e-5, "query {query:?}");
            }
        }
    }

    #[test]
    fn ties_resolve_to_lower_row() {
        for backend in [IndexBackend::Flat, IndexBackend::Brute] {
            let index = build_index(matrix(), backend);
            let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
            assert_eq!(hits[0].0, 0);
            assert_eq!(hits[1].0, 3);
        }
    }

    #[test]
    fn ranking_order_is_total_with_nan_scores() {
        let mut hits = vec![(0, 0.2), (1, f32::NAN), (2, 0.9), (3, 0.2), (4, -f32::NAN)];
        hits.sort_by(compare_hits);
        let ids: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids, vec![1, 2, 0, 3, 4]);
    }
}
