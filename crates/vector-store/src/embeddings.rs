use crate::encoder::TextEncoder;
use crate::error::{Result, VectorStoreError};
use crate::matrix::l2_normalize;
use crate::paths::{model_dir, MODELS_MANIFEST_FILE};
use ndarray::{Array, Array1, ArrayD, ArrayView2, Ix2, Ix3, IxDyn};
use once_cell::sync::OnceCell;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Display};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Multilingual sentence model; handles English and Chinese names in one space.
pub const DEFAULT_MODEL_ID: &str = "paraphrase-multilingual-mpnet-base-v2";
pub const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_BACKEND_CAPACITY: usize = 2;
const ONNX_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Onnx,
    Stub,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Stub => "stub",
        }
    }
}

impl FromStr for EmbeddingMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onnx" | "fast" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(format!(
                "unsupported embedding mode '{other}' (expected 'onnx' or 'stub')"
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unsupported device '{other}' (expected 'cpu' or 'cuda')")),
        }
    }
}

/// How to construct the embedding model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model: String,
    pub model_dir: Option<PathBuf>,
    pub device: Device,
    /// Use CPU when CUDA was requested but is unavailable.
    pub allow_cpu_fallback: bool,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Onnx,
            model: DEFAULT_MODEL_ID.to_string(),
            model_dir: None,
            device: Device::Cpu,
            allow_cpu_fallback: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModelId(String);

impl ModelId {
    fn from_raw(model_name: &str) -> Self {
        let model_name = model_name.trim().to_ascii_lowercase();
        let normalized = model_name
            .strip_prefix("sentence-transformers/")
            .unwrap_or(&model_name)
            .to_string();
        Self(normalized)
    }
}

impl Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
struct ModelSpec {
    id: ModelId,
    onnx_rel_path: PathBuf,
    tokenizer_rel_path: PathBuf,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

impl ModelSpec {
    fn builtin(id: &ModelId) -> Option<Self> {
        (id.0 == DEFAULT_MODEL_ID).then(|| Self {
            id: id.clone(),
            onnx_rel_path: PathBuf::from(ONNX_FILE),
            tokenizer_rel_path: PathBuf::from(TOKENIZER_FILE),
            dimension: 768,
            max_length: 128,
            max_batch: DEFAULT_BATCH_SIZE,
        })
    }

    fn assets_in(&self, model_dir: &Path) -> ModelAssets {
        let model_dir = model_dir.join(self.id.to_string());
        ModelAssets {
            model_path: model_dir.join(&self.onnx_rel_path),
            tokenizer_path: model_dir.join(&self.tokenizer_rel_path),
        }
    }
}

#[derive(Clone)]
struct ModelAssets {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    path: String,
}

/// Asset paths are joined under the model directory and must stay inside it.
fn manifest_asset_path(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let problem = if path
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        Some("must be relative")
    } else if path.components().any(|c| c == Component::ParentDir) {
        Some("must not contain '..'")
    } else if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        Some("is empty")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest asset path for model '{model_id}': '{rel}' {problem}"
        ))),
        None => Ok(path.to_path_buf()),
    }
}

impl ManifestModel {
    fn to_spec(&self, id: &ModelId) -> Result<ModelSpec> {
        let prefix = format!("{}/", self.id);
        let relative: Vec<&str> = self
            .assets
            .iter()
            .filter_map(|asset| asset.path.strip_prefix(&prefix))
            .collect();
        let onnx = relative.iter().find(|rel| {
            Path::new(rel)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        });
        let tokenizer = relative.iter().find(|rel| {
            Path::new(rel)
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(TOKENIZER_FILE))
        });

        Ok(ModelSpec {
            id: id.clone(),
            onnx_rel_path: match onnx {
                Some(rel) => manifest_asset_path(&self.id, rel)?,
                None => PathBuf::from(ONNX_FILE),
            },
            tokenizer_rel_path: match tokenizer {
                Some(rel) => manifest_asset_path(&self.id, rel)?,
                None => PathBuf::from(TOKENIZER_FILE),
            },
            dimension: self.dimension,
            max_length: self.max_length,
            max_batch: self.max_batch.max(1),
        })
    }
}

/// Resolve the model spec from `<model_dir>/manifest.json`. Without a manifest,
/// or when the manifest does not list the id, the built-in spec applies.
fn load_model_spec(id: &ModelId, model_dir: &Path) -> Result<ModelSpec> {
    let manifest_path = model_dir.join(MODELS_MANIFEST_FILE);
    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return ModelSpec::builtin(id).ok_or_else(|| {
                VectorStoreError::EmbeddingError(format!(
                    "Unknown embedding model id '{id}' and no models manifest found at {}",
                    manifest_path.display()
                ))
            });
        }
        Err(err) => {
            return Err(embedding_error(
                &format!("Failed to read models manifest {}", manifest_path.display()),
                err,
            ))
        }
    };

    let manifest: ModelsManifest = serde_json::from_str(&raw).map_err(|err| {
        embedding_error(
            &format!("Invalid models manifest {}", manifest_path.display()),
            err,
        )
    })?;
    if manifest.schema_version != 1 {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Unsupported models manifest schema_version {} (expected 1)",
            manifest.schema_version
        )));
    }

    match manifest
        .models
        .iter()
        .find(|m| ModelId::from_raw(&m.id) == *id)
    {
        Some(entry) => entry.to_spec(id),
        None => ModelSpec::builtin(id).ok_or_else(|| {
            let listed: Vec<&str> = manifest.models.iter().map(|m| m.id.as_str()).collect();
            VectorStoreError::EmbeddingError(format!(
                "Unknown embedding model id '{id}'. Available: {}",
                listed.join(", ")
            ))
        }),
    }
}

fn embedding_error(context: &str, err: impl Display) -> VectorStoreError {
    VectorStoreError::EmbeddingError(format!("{context}: {err}"))
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    spec: ModelSpec,
}

impl OrtBackend {
    fn new(spec: &ModelSpec, model_dir: &Path, device: Device, allow_cpu: bool) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let assets = spec.assets_in(model_dir);
        if !assets.model_path.exists() || !assets.tokenizer_path.exists() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {} (set SKINMATCH_MODEL_DIR or embedding.model_dir).",
                spec.id,
                assets.model_path.display(),
                assets.tokenizer_path.display(),
            )));
        }

        let tokenizer = load_tokenizer(&assets.tokenizer_path, spec.max_length)?;
        let providers = build_execution_providers(device, allow_cpu)?;
        let session = open_session(&assets.model_path, providers)?;

        log::info!(
            "Loaded ONNX model '{}' on {} (dim {}, max_length {}, batch {})",
            spec.id,
            device.as_str(),
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            spec: spec.clone(),
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.spec.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| embedding_error("Tokenization failed", e))?;
            if encodings.is_empty() {
                continue;
            }
            let inputs = BatchInputs::from_encodings(&encodings, self.spec.max_length)?;
            let output = self.run(&inputs)?;
            results.extend(pool_output(output, &inputs, self.spec.dimension)?);
        }
        Ok(results)
    }

    fn run(&self, inputs: &BatchInputs) -> Result<ArrayD<f32>> {
        let mut provided: HashMap<&str, DynTensor> = HashMap::from([
            ("input_ids", inputs.tensor(&inputs.ids)?),
            ("attention_mask", inputs.tensor(&inputs.mask)?),
            ("token_type_ids", inputs.tensor(&inputs.type_ids)?),
        ]);
        let shape = IxDyn(&[inputs.rows, inputs.seq_len]);

        let mut session = self
            .session
            .lock()
            .map_err(|_| VectorStoreError::EmbeddingError("Failed to lock ONNX session".into()))?;

        // XLM-R style graphs declare no token_type_ids; anything else they declare is zero-filled.
        let mut feed: HashMap<String, DynTensor> = HashMap::with_capacity(session.inputs.len());
        for input in &session.inputs {
            let value = match provided.remove(input.name.as_str()) {
                Some(value) => value,
                None => zero_tensor(&shape, input)?,
            };
            feed.insert(input.name.clone(), value);
        }

        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(|e| embedding_error("ONNX forward failed", e))?;
        if outputs.len() == 0 {
            return Err(VectorStoreError::EmbeddingError(
                "ONNX returned no outputs".to_string(),
            ));
        }
        let array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| embedding_error("Failed to decode ONNX output", e))?
            .to_owned();
        Ok(array)
    }
}

fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer =
        Tokenizer::from_file(path).map_err(|e| embedding_error("Tokenizer load failed", e))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..PaddingParams::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..TruncationParams::default()
        }))
        .map_err(|e| embedding_error("Tokenizer truncation failed", e))?;
    Ok(tokenizer)
}

fn open_session(model_path: &Path, providers: Vec<ExecutionProviderDispatch>) -> Result<Session> {
    Session::builder()
        .map_err(|e| embedding_error("Failed to create ORT session", e))?
        .with_intra_threads(default_intra_threads())
        .map_err(|e| embedding_error("Failed to set ORT intra threads", e))?
        .with_inter_threads(1)
        .map_err(|e| embedding_error("Failed to set ORT inter threads", e))?
        .with_execution_providers(providers)
        .map_err(|e| embedding_error("Failed to register execution provider", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| embedding_error("Failed to set optimization level", e))?
        .commit_from_file(model_path)
        .map_err(|e| embedding_error("Failed to load ONNX model", e))
}

/// ORT session threads, scaled down on small machines where the rayon index
/// scan competes for the same cores.
fn default_intra_threads() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    match cpus {
        0..=4 => 1,
        5..=12 => 2,
        _ => 4,
    }
}

fn build_execution_providers(
    device: Device,
    allow_cpu: bool,
) -> Result<Vec<ExecutionProviderDispatch>> {
    if device == Device::Cpu {
        return Ok(vec![CPUExecutionProvider::default().build()]);
    }

    let cuda = CUDAExecutionProvider::default();
    let unavailable = match cuda.is_available() {
        Ok(true) => return Ok(vec![cuda.build()]),
        Ok(false) => "CUDA execution provider is not available".to_string(),
        Err(err) => format!("CUDA execution provider check failed: {err}"),
    };

    if allow_cpu {
        log::warn!("{unavailable}; falling back to CPU embeddings");
        Ok(vec![CPUExecutionProvider::default().build()])
    } else {
        Err(VectorStoreError::EmbeddingError(format!(
            "{unavailable}. Set embedding.allow_cpu_fallback = true to use the CPU."
        )))
    }
}

const fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

/// One padded batch, row-major `rows x seq_len`.
struct BatchInputs {
    rows: usize,
    seq_len: usize,
    ids: Vec<i64>,
    mask: Vec<i64>,
    type_ids: Vec<i64>,
}

impl BatchInputs {
    fn from_encodings(encodings: &[Encoding], max_length: usize) -> Result<Self> {
        let seq_len = encodings.first().map_or(0, Encoding::len);
        if seq_len > max_length {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Tokenized length {seq_len} exceeds max_length {max_length}"
            )));
        }
        if encodings.iter().any(|e| e.len() != seq_len) {
            return Err(VectorStoreError::EmbeddingError(
                "Inconsistent sequence lengths after padding".to_string(),
            ));
        }

        let cells = encodings.len() * seq_len;
        let mut inputs = Self {
            rows: encodings.len(),
            seq_len,
            ids: Vec::with_capacity(cells),
            mask: Vec::with_capacity(cells),
            type_ids: Vec::with_capacity(cells),
        };
        for encoding in encodings {
            inputs.ids.extend(encoding.get_ids().iter().map(|&v| i64::from(v)));
            inputs
                .mask
                .extend(encoding.get_attention_mask().iter().map(|&v| i64::from(v)));
            inputs
                .type_ids
                .extend(encoding.get_type_ids().iter().map(|&v| i64::from(v)));
        }
        Ok(inputs)
    }

    fn mask_row(&self, row: usize) -> &[i64] {
        let start = row * self.seq_len;
        self.mask
            .get(start..start + self.seq_len)
            .unwrap_or_default()
    }

    fn tensor(&self, values: &[i64]) -> Result<DynTensor> {
        let array = Array::from_shape_vec((self.rows, self.seq_len), values.to_vec())
            .map_err(|e| embedding_error("Input shape error", e))?;
        Ok(Tensor::from_array(array.into_dyn())
            .map_err(|e| embedding_error("Failed to build input tensor", e))?
            .upcast())
    }
}

/// Sentence vectors from the first model output. A rank-2 output is already
/// pooled; a rank-3 output holds token states and is mean-pooled over the mask.
fn pool_output(
    output: ArrayD<f32>,
    inputs: &BatchInputs,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors: Vec<Vec<f32>> = match output.ndim() {
        2 => output
            .into_dimensionality::<Ix2>()
            .map_err(|e| embedding_error("Bad output shape", e))?
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        3 => output
            .into_dimensionality::<Ix3>()
            .map_err(|e| embedding_error("Bad output shape", e))?
            .outer_iter()
            .enumerate()
            .map(|(row, tokens)| mean_pool(tokens, inputs.mask_row(row)))
            .collect(),
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unexpected ONNX output dims: {:?}",
                output.shape()
            )))
        }
    };

    for vector in &mut vectors {
        ensure_dimension(vector, dimension)?;
        l2_normalize(vector);
    }
    Ok(vectors)
}

fn mean_pool(tokens: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let mut sum = Array1::<f32>::zeros(tokens.ncols());
    let mut kept = 0usize;
    for (token, _) in tokens.outer_iter().zip(mask).filter(|(_, flag)| **flag != 0) {
        sum += &token;
        kept += 1;
    }
    if kept > 0 {
        sum /= kept as f32;
    }
    sum.to_vec()
}

fn zero_tensor(shape: &IxDyn, input: &Input) -> Result<DynTensor> {
    let ort::value::ValueType::Tensor { ty, .. } = &input.input_type else {
        return Err(VectorStoreError::EmbeddingError(format!(
            "ONNX input '{}' is not a tensor",
            input.name
        )));
    };
    let tensor = match ty {
        TensorElementType::Int64 => {
            Tensor::from_array(Array::<i64, _>::zeros(shape.clone())).map(|t| t.upcast())
        }
        TensorElementType::Float32 => {
            Tensor::from_array(Array::<f32, _>::zeros(shape.clone())).map(|t| t.upcast())
        }
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Cannot zero-fill ONNX input '{}' of type {other:?}",
                input.name
            )))
        }
    };
    tensor.map_err(|e| embedding_error(&format!("Cannot zero-fill ONNX input '{}'", input.name), e))
}

/// Deterministic, meaning-free backend for offline runs and tests.
#[derive(Clone)]
struct StubBackend {
    dimension: usize,
    #[cfg(test)]
    batch_calls: Arc<AtomicUsize>,
}

impl StubBackend {
    #[cfg(not(test))]
    const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    #[cfg(test)]
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        #[cfg(test)]
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        texts
            .iter()
            .map(|text| stub_embed(text, self.dimension))
            .collect()
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let mantissa = ((bits >> 32) as u32) >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    l2_normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Everything that shapes a loaded session: two configs that differ in any
/// field must not share one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BackendKey {
    model: ModelId,
    model_dir: PathBuf,
    device: Device,
    allow_cpu_fallback: bool,
}

/// Process-wide ONNX sessions, shared by every resolver in the process.
static BACKENDS: OnceCell<Mutex<BackendCache<OrtBackend>>> = OnceCell::new();

/// Completion slot for one in-flight load. `None` until the loader reports back.
struct LoadWaiter<B> {
    slot: Arc<(Mutex<Option<LoadOutcome<B>>>, Condvar)>,
}

type LoadOutcome<B> = std::result::Result<Arc<B>, String>;

impl<B> Clone for LoadWaiter<B> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<B> LoadWaiter<B> {
    fn new() -> Self {
        Self {
            slot: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    fn finish(&self, outcome: LoadOutcome<B>) {
        let (slot, ready) = &*self.slot;
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        ready.notify_all();
    }

    fn wait(&self) -> Result<Arc<B>> {
        let (slot, ready) = &*self.slot;
        let guard = ready
            .wait_while(
                slot.lock().unwrap_or_else(PoisonError::into_inner),
                |outcome| outcome.is_none(),
            )
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(Ok(backend)) => Ok(Arc::clone(backend)),
            Some(Err(message)) => Err(VectorStoreError::EmbeddingError(message.clone())),
            None => Err(VectorStoreError::EmbeddingError(
                "backend load finished without a result".to_string(),
            )),
        }
    }
}

enum BackendEntry<B> {
    Ready(Arc<B>),
    Loading(LoadWaiter<B>),
}

enum Lookup<B> {
    Ready(Arc<B>),
    Wait(LoadWaiter<B>),
    Load(LoadWaiter<B>),
}

struct BackendCache<B> {
    capacity: usize,
    entries: HashMap<BackendKey, BackendEntry<B>>,
    lru: VecDeque<BackendKey>,
}

impl<B> BackendCache<B> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            lru: VecDeque::new(),
        }
    }

    fn lookup(&mut self, key: &BackendKey) -> Lookup<B> {
        match self.entries.get(key) {
            Some(BackendEntry::Ready(backend)) => {
                let backend = backend.clone();
                self.touch(key);
                Lookup::Ready(backend)
            }
            Some(BackendEntry::Loading(waiter)) => Lookup::Wait(waiter.clone()),
            None => {
                let waiter = LoadWaiter::new();
                self.entries
                    .insert(key.clone(), BackendEntry::Loading(waiter.clone()));
                Lookup::Load(waiter)
            }
        }
    }

    fn touch(&mut self, key: &BackendKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_front(key.clone());
    }

    fn finish_ok(&mut self, key: &BackendKey, backend: Arc<B>) {
        self.entries
            .insert(key.clone(), BackendEntry::Ready(backend));
        self.touch(key);
        self.evict_if_needed();
    }

    fn finish_err(&mut self, key: &BackendKey) {
        self.entries.remove(key);
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
    }

    fn evict_if_needed(&mut self) {
        while self.ready_len() > self.capacity {
            let Some(victim) = self.lru.pop_back() else {
                break;
            };
            if matches!(self.entries.get(&victim), Some(BackendEntry::Loading(_))) {
                // In-flight loads are never evicted.
                self.lru.push_front(victim);
                break;
            }
            self.entries.remove(&victim);
        }
    }

    fn ready_len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, BackendEntry::Ready(_)))
            .count()
    }
}

/// Single-flight lookup: concurrent callers for one key share one load, and a
/// failed load is dropped so a later call can retry.
fn get_or_load<B, F>(cache: &Mutex<BackendCache<B>>, key: &BackendKey, load: F) -> Result<Arc<B>>
where
    F: FnOnce() -> Result<B>,
{
    let lookup = cache
        .lock()
        .map_err(|_| VectorStoreError::EmbeddingError("Failed to lock backend cache".into()))?
        .lookup(key);

    match lookup {
        Lookup::Ready(backend) => Ok(backend),
        Lookup::Wait(waiter) => waiter.wait(),
        Lookup::Load(waiter) => match load() {
            Ok(backend) => {
                let backend = Arc::new(backend);
                cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .finish_ok(key, backend.clone());
                waiter.finish(Ok(backend.clone()));
                Ok(backend)
            }
            Err(err) => {
                cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .finish_err(key);
                waiter.finish(Err(err.to_string()));
                Err(err)
            }
        },
    }
}

enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub(StubBackend),
}

/// Sentence embedding model backed by ONNX Runtime (or the stub backend).
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl EmbeddingModel {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let id = ModelId::from_raw(&config.model);
        let dir = model_dir(config.model_dir.as_deref());
        let spec = load_model_spec(&id, &dir)?;
        let batch_size = config.batch_size.max(1);

        let backend = match config.mode {
            EmbeddingMode::Stub => {
                log::info!(
                    "Using stub embeddings for '{}' (dim {})",
                    spec.id,
                    spec.dimension
                );
                EmbeddingBackend::Stub(StubBackend::new(spec.dimension))
            }
            EmbeddingMode::Onnx => {
                let key = BackendKey {
                    model: id.clone(),
                    model_dir: dir.clone(),
                    device: config.device,
                    allow_cpu_fallback: config.allow_cpu_fallback,
                };
                let cache = BACKENDS
                    .get_or_init(|| Mutex::new(BackendCache::new(DEFAULT_BACKEND_CAPACITY)));
                let backend = get_or_load(cache, &key, || {
                    OrtBackend::new(&spec, &dir, config.device, config.allow_cpu_fallback)
                })?;
                EmbeddingBackend::Ort(backend)
            }
        };

        // Stub vectors live in their own space; keep their cache separate.
        let model_id = match config.mode {
            EmbeddingMode::Onnx => id.to_string(),
            EmbeddingMode::Stub => format!("stub:{id}"),
        };

        Ok(Self {
            backend,
            model_id,
            dimension: spec.dimension,
            batch_size,
        })
    }

    /// Stub model of the given dimension, no model files required.
    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Stub(StubBackend::new(dimension)),
            model_id: "stub".to_string(),
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn is_stub(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Stub(_))
    }

    #[cfg(test)]
    fn stub_batch_calls(&self) -> Option<usize> {
        match &self.backend {
            EmbeddingBackend::Stub(stub) => Some(stub.batch_calls.load(Ordering::Relaxed)),
            EmbeddingBackend::Ort(_) => None,
        }
    }
}

impl TextEncoder for EmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = match &self.backend {
                EmbeddingBackend::Stub(stub) => stub.embed_batch(batch),
                EmbeddingBackend::Ort(backend) => backend.embed_batch_blocking(batch)?,
            };
            for vector in &vectors {
                ensure_dimension(vector, self.dimension)?;
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}
