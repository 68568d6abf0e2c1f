use crate::encoder::TextEncoder;
use crate::error::{Result, VectorStoreError};
use crate::embeddings::DEFAULT_BATCH_SIZE;
use crate::matrix::EmbeddingMatrix;
use crate::paths::lock_path_for;
use fs2::FileExt;
use ndarray::Array2;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;

const CACHE_MAGIC: &[u8; 4] = b"SKE2";
/// Magic plus rows, cols and model id length.
const FIXED_HEADER_LEN: usize = 16;

/// On-disk catalog embedding matrix.
///
/// Layout: magic `SKE2`, `u32` rows, `u32` cols, `u32` model id length, the
/// UTF-8 model id, then `rows * cols` little-endian `f32` values in
/// row-major order. Vectors from different models are never comparable, so
/// the id is checked before the matrix is reused.
/// A matrix read back from disk together with the model that produced it.
#[derive(Debug)]
pub struct CachedEmbeddings {
    pub model_id: String,
    pub matrix: EmbeddingMatrix,
}

#[derive(Clone, Debug)]
pub struct EmbeddingCache {
    path: PathBuf,
    batch_size: usize,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return a matrix with one row per name: the cached one when it fits,
    /// otherwise a freshly encoded one.
    ///
    /// A missing, corrupt or mismatched artifact is recomputed. Only encoder
    /// failures are returned as errors; a failed write is logged and the
    /// in-memory matrix is used anyway.
    pub fn ensure(
        &self,
        names: &[String],
        encoder: &dyn TextEncoder,
        force_rebuild: bool,
    ) -> Result<EmbeddingMatrix> {
        if !force_rebuild {
            match self.load() {
                Ok(cached) if cached.model_id != encoder.model_id() => {
                    log::warn!(
                        "Embedding cache {} was built by model '{}' but the encoder is '{}'; recomputing",
                        self.path.display(),
                        cached.model_id,
                        encoder.model_id()
                    );
                }
                Ok(CachedEmbeddings { matrix, .. }) if matrix.rows() != names.len() => {
                    log::warn!(
                        "Embedding cache {} has {} rows but the catalog has {} names; recomputing",
                        self.path.display(),
                        matrix.rows(),
                        names.len()
                    );
                }
                Ok(CachedEmbeddings { matrix, .. })
                    if matrix.dimension() != encoder.dimension() =>
                {
                    log::warn!(
                        "Embedding cache {} has dimension {} but model '{}' produces {}; recomputing",
                        self.path.display(),
                        matrix.dimension(),
                        encoder.model_id(),
                        encoder.dimension()
                    );
                }
                Ok(CachedEmbeddings { matrix, .. }) => {
                    log::info!(
                        "Loaded cached embeddings from {} ({} x {})",
                        self.path.display(),
                        matrix.rows(),
                        matrix.dimension()
                    );
                    return Ok(matrix);
                }
                Err(VectorStoreError::IoError(err))
                    if err.kind() == std::io::ErrorKind::NotFound =>
                {
                    log::info!(
                        "No embedding cache at {}; encoding the catalog",
                        self.path.display()
                    );
                }
                Err(err) => {
                    log::warn!("{err}; recomputing embeddings");
                }
            }
        }

        let matrix = self.compute(names, encoder)?;
        if let Err(err) = self.save(&matrix, encoder.model_id()) {
            log::warn!(
                "Failed to persist embedding cache {}: {err}",
                self.path.display()
            );
        }
        Ok(matrix)
    }

    /// Encode every name in batches and stack the normalized rows.
    pub fn compute(&self, names: &[String], encoder: &dyn TextEncoder) -> Result<EmbeddingMatrix> {
        let started = Instant::now();
        let dimension = encoder.dimension();
        let mut rows = Vec::with_capacity(names.len());
        for batch in names.chunks(self.batch_size) {
            let vectors = encoder.encode_batch(batch)?;
            if vectors.len() != batch.len() {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Encoder returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(offset) = vectors
                .iter()
                .position(|v| v.iter().any(|x| !x.is_finite()))
            {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Encoder produced non-finite values for '{}'",
                    batch[offset]
                )));
            }
            rows.extend(vectors);
            log::debug!("Encoded {}/{} catalog names", rows.len(), names.len());
        }
        let matrix = EmbeddingMatrix::from_rows(rows, dimension)?;
        log::info!(
            "Encoded {} catalog names with '{}' in {:.2?}",
            matrix.rows(),
            encoder.model_id(),
            started.elapsed()
        );
        Ok(matrix)
    }

    pub fn load(&self) -> Result<CachedEmbeddings> {
        let bytes = std::fs::read(&self.path)?;
        decode_cache(&bytes).map_err(|reason| {
            VectorStoreError::CacheInvalid(format!("{}: {reason}", self.path.display()))
        })
    }

    /// Write under an exclusive lock file; readers never observe a partial
    /// artifact because the data lands via rename.
    pub fn save(&self, matrix: &EmbeddingMatrix, model_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path_for(&self.path))?;
        lock_file.lock_exclusive()?;

        let bytes = encode_cache(matrix, model_id)?;
        let tmp = self.path.with_extension("bin.tmp");
        let written = std::fs::write(&tmp, &bytes).and_then(|()| std::fs::rename(&tmp, &self.path));
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        let _ = FileExt::unlock(&lock_file);
        written?;

        log::info!(
            "Saved embedding cache {} ({} x {}, model '{model_id}')",
            self.path.display(),
            matrix.rows(),
            matrix.dimension()
        );
        Ok(())
    }
}

fn encode_cache(matrix: &EmbeddingMatrix, model_id: &str) -> Result<Vec<u8>> {
    let too_large =
        |what: &str| VectorStoreError::Other(format!("{what} too large for the cache format"));
    let rows = u32::try_from(matrix.rows()).map_err(|_| too_large("Row count"))?;
    let cols = u32::try_from(matrix.dimension()).map_err(|_| too_large("Dimension"))?;
    let id_len = u32::try_from(model_id.len()).map_err(|_| too_large("Model id"))?;
    let values = matrix.to_row_major();

    let mut out = Vec::with_capacity(FIXED_HEADER_LEN + model_id.len() + values.len() * 4);
    out.extend_from_slice(CACHE_MAGIC);
    out.extend_from_slice(&rows.to_le_bytes());
    out.extend_from_slice(&cols.to_le_bytes());
    out.extend_from_slice(&id_len.to_le_bytes());
    out.extend_from_slice(model_id.as_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

fn decode_cache(bytes: &[u8]) -> std::result::Result<CachedEmbeddings, String> {
    if bytes.len() < FIXED_HEADER_LEN || &bytes[0..4] != CACHE_MAGIC {
        return Err("not an embedding cache file".to_string());
    }
    let rows = read_u32(&bytes[4..8]) as usize;
    let cols = read_u32(&bytes[8..12]) as usize;
    let id_len = read_u32(&bytes[12..16]) as usize;

    let data_start = FIXED_HEADER_LEN
        .checked_add(id_len)
        .ok_or_else(|| format!("model id length {id_len} overflows"))?;
    let expected_len = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(data_start))
        .ok_or_else(|| format!("header overflows ({rows} x {cols})"))?;
    if bytes.len() != expected_len {
        return Err(format!(
            "expected {expected_len} bytes for {rows} x {cols}, found {}",
            bytes.len()
        ));
    }

    let model_id = std::str::from_utf8(&bytes[FIXED_HEADER_LEN..data_start])
        .map_err(|_| "model id is not UTF-8".to_string())?
        .to_string();
    let values: Vec<f32> = bytes[data_start..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err("contains non-finite values".to_string());
    }
    let data = Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())?;
    Ok(CachedEmbeddings {
        model_id,
        matrix: EmbeddingMatrix::from_normalized(data),
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
