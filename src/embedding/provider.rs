/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Raw model access. Callers go through [`super::Embedder`], which handles
/// empty inputs, batching and normalization.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for non-empty texts, one per input
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Supported FastEmbed models:
/// (name, model, dimension, approximate download MB, Hugging Face repo)
const MODELS: &[(&str, EmbeddingModel, usize, usize, &str)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384, 90, "Qdrant/all-MiniLM-L6-v2-onnx"),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384, 130, "Xenova/bge-small-en-v1.5"),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768, 440, "Xenova/bge-base-en-v1.5"),
];

/// fastembed's cache directory when none is configured
pub const DEFAULT_CACHE_DIR: &str = ".fastembed_cache";

/// Default sentence-embedding model
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Dimension of a supported model, without loading it
pub fn model_dimension(model_name: &str) -> Option<usize> {
    lookup(model_name).map(|(_, _, dim, ..)| *dim)
}

/// `tokenizer.json` of a model already downloaded into the fastembed cache.
///
/// Looks under `{cache_dir}/models--{org}--{repo}/snapshots/*/`. Returns
/// `None` for unknown models or when nothing has been downloaded yet.
pub fn cached_tokenizer_file(model_name: &str, cache_dir: Option<&Path>) -> Option<PathBuf> {
    let (.., repo) = lookup(model_name)?;
    let cache_dir = cache_dir.unwrap_or_else(|| Path::new(DEFAULT_CACHE_DIR));
    let snapshots = cache_dir
        .join(format!("models--{}", repo.replace('/', "--")))
        .join("snapshots");

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(&snapshots)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("tokenizer.json"))
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();
    candidates.pop()
}

fn lookup(
    model_name: &str,
) -> Option<&'static (&'static str, EmbeddingModel, usize, usize, &'static str)> {
    MODELS
        .iter()
        .find(|(name, ..)| name.eq_ignore_ascii_case(model_name))
}

/// FastEmbed provider for local embedding generation
///
/// The ONNX model is loaded on the first embedding call, not at
/// construction. Models are downloaded on demand into `cache_dir` (or the
/// fastembed default) the first time they are used.
pub struct FastEmbedProvider {
    model: Mutex<Option<Arc<TextEmbedding>>>,
    embedding_model: EmbeddingModel,
    model_name: String,
    dimension: usize,
    download_mb: usize,
    cache_dir: Option<PathBuf>,
}

impl FastEmbedProvider {
    /// Create a provider for a supported model.
    ///
    /// Supported: all-MiniLM-L6-v2 (384d), bge-small-en-v1.5 (384d),
    /// bge-base-en-v1.5 (768d).
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self, EmbeddingError> {
        let (name, embedding_model, dimension, download_mb, _) =
            lookup(model_name).ok_or_else(|| {
                EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    MODELS
                        .iter()
                        .map(|(name, ..)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;

        Ok(Self {
            model: Mutex::new(None),
            embedding_model: embedding_model.clone(),
            model_name: name.to_string(),
            dimension: *dimension,
            download_mb: *download_mb,
            cache_dir,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new(DEFAULT_MODEL, None)
    }

    /// True once the model has been loaded
    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    fn model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
        let mut slot = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::InitializationError("model lock poisoned".to_string()))?;

        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            self.model_name, self.dimension, self.download_mb
        );

        let mut init_options =
            InitOptions::new(self.embedding_model.clone()).with_show_download_progress(true);
        if let Some(dir) = &self.cache_dir {
            init_options = init_options.with_cache_dir(dir.clone());
        }

        let model = Arc::new(
            TextEmbedding::try_new(init_options)
                .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?,
        );
        *slot = Some(Arc::clone(&model));

        Ok(model)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Empty text passed to provider".to_string(),
            ));
        }

        let model = self.model()?;
        debug!("Embedding {} texts with {}", texts.len(), self.model_name);

        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
