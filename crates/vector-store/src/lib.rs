//! # Skinmatch Vector Store
//!
//! Embeddings and similarity search for item-name resolution.
//!
//! ## Architecture
//!
//! ```text
//! catalog names
//!     │
//!     ├──> EmbeddingModel (ONNX Runtime / stub)
//!     │      └─> unit vectors [768]
//!     │
//!     ├──> EmbeddingCache (SKE2 binary keyed by model id, lock file + atomic rename)
//!     │      └─> EmbeddingMatrix [N x D]
//!     │
//!     └──> SimilarityIndex
//!            ├─> FlatIpIndex (exact inner product, rayon)
//!            └─> BruteForceIndex (cosine scan)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use skinmatch_vector_store::{
//!     build_index, EmbeddingCache, EmbeddingModel, IndexBackend, TextEncoder,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> skinmatch_vector_store::Result<()> {
//!     let model = EmbeddingModel::stub(32);
//!     let names = vec!["AK-47 | Redline (Field-Tested)".to_string()];
//!     let matrix = EmbeddingCache::new("data/cache/skin_embeddings.bin")
//!         .ensure(&names, &model, false)?;
//!     let index = build_index(Arc::new(matrix), IndexBackend::Auto);
//!     let hits = index.search(&model.encode("ak47 redline")?, 3)?;
//!     println!("{hits:?}");
//!     Ok(())
//! }
//! ```

mod brute_force;
mod embedding_cache;
mod embeddings;
mod encoder;
mod error;
#[cfg(feature = "accelerated-index")]
mod flat_ip;
mod index;
mod matrix;
pub mod paths;

pub use brute_force::BruteForceIndex;
pub use embedding_cache::{CachedEmbeddings, EmbeddingCache};
pub use embeddings::{
    Device, EmbeddingConfig, EmbeddingMode, EmbeddingModel, DEFAULT_BATCH_SIZE, DEFAULT_MODEL_ID,
};
pub use encoder::TextEncoder;
pub use error::{Result, VectorStoreError};
#[cfg(feature = "accelerated-index")]
pub use flat_ip::FlatIpIndex;
pub use index::{accelerated_available, build_index, IndexBackend, IndexKind, SimilarityIndex};
pub use matrix::{cosine_similarity, l2_normalize, EmbeddingMatrix};
