use crate::error::{Result, VectorStoreError};
use crate::index::{compare_hits, IndexKind, SimilarityIndex};
use crate::matrix::{cosine_similarity, EmbeddingMatrix};
use ndarray::ArrayView1;
use std::sync::Arc;

/// Linear cosine scan over every row of the shared catalog matrix. Always
/// available.
pub struct BruteForceIndex {
    matrix: Arc<EmbeddingMatrix>,
}

impl BruteForceIndex {
    #[must_use]
    pub const fn new(matrix: Arc<EmbeddingMatrix>) -> Self {
        Self { matrix }
    }
}

fn row_similarity(query: &[f32], row: ArrayView1<'_, f32>) -> f32 {
    match row.as_slice() {
        Some(row) => cosine_similarity(query, row),
        None => cosine_similarity(query, &row.to_vec()),
    }
}

impl SimilarityIndex for BruteForceIndex {
    fn len(&self) -> usize {
        self.matrix.rows()
    }

    fn dimension(&self) -> usize {
        self.matrix.dimension()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::BruteForce
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension() {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let mut scores: Vec<(usize, f32)> = self
            .matrix
            .view()
            .outer_iter()
            .enumerate()
            .map(|(id, row)| (id, row_similarity(query, row)))
            .collect();

        scores.sort_by(compare_hits);
        scores.truncate(k);

        Ok(scores)
    }
}
