use crate::error::Result;

/// Text → vector encoder.
///
/// Catalog rows and queries must go through the same encoder so both live in
/// one vector space. Implementations return one vector of `dimension()`
/// floats per input, in input order.
pub trait TextEncoder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.encode_batch(&[text.to_string()])?;
        out.pop().ok_or_else(|| {
            crate::VectorStoreError::EmbeddingError("Empty embedding result".to_string())
        })
    }
}
