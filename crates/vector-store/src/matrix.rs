use crate::error::{Result, VectorStoreError};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// `N x D` matrix of unit-length embeddings, one row per catalog entry.
///
/// Row `i` always belongs to catalog entry `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Array2<f32>,
}

impl EmbeddingMatrix {
    /// Stack rows and L2-normalize each of them.
    pub fn from_rows(rows: Vec<Vec<f32>>, dimension: usize) -> Result<Self> {
        let count = rows.len();
        let mut flat = Vec::with_capacity(count * dimension);
        for mut row in rows {
            if row.len() != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            l2_normalize(&mut row);
            flat.extend_from_slice(&row);
        }
        let data = Array2::from_shape_vec((count, dimension), flat)
            .map_err(|e| VectorStoreError::Other(format!("Matrix shape error: {e}")))?;
        Ok(Self { data })
    }

    /// Adopt an already-normalized matrix (e.g. read back from the cache).
    #[must_use]
    pub const fn from_normalized(data: Array2<f32>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<ArrayView1<'_, f32>> {
        (index < self.rows()).then(|| self.data.index_axis(Axis(0), index))
    }

    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Row-major copy of the values.
    #[must_use]
    pub fn to_row_major(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
