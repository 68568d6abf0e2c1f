use crate::error::{Result, VectorStoreError};
use crate::index::{compare_hits, IndexKind, SimilarityIndex};
use crate::matrix::{l2_normalize, EmbeddingMatrix};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use std::sync::Arc;

/// Exact inner-product index over the normalized catalog matrix, scored
/// row-parallel.
pub struct FlatIpIndex {
    matrix: Arc<EmbeddingMatrix>,
}

impl FlatIpIndex {
    #[must_use]
    pub const fn new(matrix: Arc<EmbeddingMatrix>) -> Self {
        Self { matrix }
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        let expected = self.matrix.dimension();
        if actual != expected {
            return Err(VectorStoreError::InvalidDimension { expected, actual });
        }
        Ok(())
    }

    fn scores(&self, query: ArrayView1<'_, f32>) -> Array1<f32> {
        let view = self.matrix.view();
        let mut scores = Array1::<f32>::zeros(view.nrows());
        Zip::from(&mut scores)
            .and(view.rows())
            .par_for_each(|score, row| *score = row.dot(&query));
        scores
    }

    /// Search several queries at once; one result list per query row.
    pub fn search_batch(
        &self,
        queries: ArrayView2<'_, f32>,
        k: usize,
    ) -> Result<Vec<Vec<(usize, f32)>>> {
        self.check_dimension(queries.ncols())?;
        if k == 0 || self.matrix.is_empty() {
            return Ok(vec![Vec::new(); queries.nrows()]);
        }

        let mut normalized = queries.to_owned();
        for mut row in normalized.axis_iter_mut(Axis(0)) {
            if let Some(slice) = row.as_slice_mut() {
                l2_normalize(slice);
            }
        }
        let scores = normalized.dot(&self.matrix.view().t());
        Ok(scores
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| top_k(row.iter().copied(), k))
            .collect())
    }
}

impl SimilarityIndex for FlatIpIndex {
    fn len(&self) -> usize {
        self.matrix.rows()
    }

    fn dimension(&self) -> usize {
        self.matrix.dimension()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::FlatIp
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.check_dimension(query.len())?;
        if k == 0 || self.matrix.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        l2_normalize(&mut query);
        let scores = self.scores(ArrayView1::from(query.as_slice()));
        Ok(top_k(scores.iter().copied(), k))
    }
}

fn top_k(scores: impl Iterator<Item = f32>, k: usize) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = scores.enumerate().collect();
    if hits.len() > k {
        hits.select_nth_unstable_by(k - 1, compare_hits);
        hits.truncate(k);
    }
    hits.sort_by(compare_hits);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn index() -> FlatIpIndex {
        let matrix = EmbeddingMatrix::from_rows(
            vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.6, 0.8],
                vec![0.8, 0.6],
                vec![-1.0, 0.0],
            ],
            2,
        )
        .unwrap();
        FlatIpIndex::new(Arc::new(matrix))
    }

    #[test]
    fn search_returns_top_k_in_order() {
        let hits = index().search(&[2.0, 0.0], 3).unwrap();
        let ids: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids, vec![0, 3, 2]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!((hits[1].1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn k_larger_than_rows_returns_all() {
        let hits = index().search(&[0.0, 1.0], 10).unwrap();
        assert_eq!(hits.len(), 5);
        let ids: Vec<usize> = hits.iter().map(|h| h.0).collect();
        // Rows 0 and 4 both score 0.0; the lower row ranks first.
        assert_eq!(ids, vec![1, 2, 3, 0, 4]);

        let brute = crate::brute_force::BruteForceIndex::new(Arc::clone(&index().matrix));
        let brute_ids: Vec<usize> = brute
            .search(&[0.0, 1.0], 10)
            .unwrap()
            .iter()
            .map(|h| h.0)
            .collect();
        assert_eq!(brute_ids, ids);
    }

    #[test]
    fn batch_matches_single_queries() {
        let index = index();
        let queries = arr2(&[[1.0f32, 0.0], [0.0, 3.0], [0.7, 0.7]]);
        let batch = index.search_batch(queries.view(), 2).unwrap();
        for (row, expected) in queries.outer_iter().zip(&batch) {
            let single = index.search(&row.to_vec(), 2).unwrap();
            assert_eq!(single.len(), expected.len());
            for (a, b) in single.iter().zip(expected) {
                assert_eq!(a.0, b.0);
                assert!((a.1 - b.1).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = index();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 3
            })
        ));
        let queries = arr2(&[[1.0f32, 0.0, 0.0]]);
        assert!(index.search_batch(queries.view(), 1).is_err());
    }

    #[test]
    fn top_k_breaks_ties_by_row() {
        let hits = top_k([0.5, 0.9, 0.9, 0.1, 0.9].into_iter(), 2);
        assert_eq!(hits, vec![(1, 0.9), (2, 0.9)]);
    }
}
