//! Embedding & Indexing
//!
//! Local embedding generation and vector similarity indexes.
//! Architecture:
//! - EmbeddingProvider trait for raw model access
//! - FastEmbedProvider for local ONNX models (all-MiniLM-L6-v2, 384-dim)
//! - HashEmbeddingProvider for offline deterministic embeddings
//! - Embedder for zero-vector handling, batching and normalization
//! - SimilarityIndex trait with flat and IVF implementations

mod generator;
mod hashing;
mod ivf;
mod provider;
mod vector_index;

pub use generator::{is_zero_vector, Embedder};
pub use hashing::HashEmbeddingProvider;
pub use ivf::{IvfIndex, IvfSnapshot, NLIST, NPROBE};
pub use provider::{
    cached_tokenizer_file, model_dimension, EmbeddingError, EmbeddingProvider, FastEmbedProvider,
    DEFAULT_CACHE_DIR, DEFAULT_MODEL,
};
pub use vector_index::{
    new_index, restore, FlatIndex, IndexKind, IndexSnapshot, Neighbor, SimilarityIndex,
    VectorIndexError,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Which provider backs the embedder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX model via fastembed
    #[default]
    Fastembed,
    /// Offline feature hashing
    Hash,
}

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    /// Model name (e.g., "all-MiniLM-L6-v2")
    pub model: String,
    /// Embedding dimension (384 for MiniLM)
    pub dimension: usize,
    /// Batch size for processing
    pub batch_size: usize,
    /// Model download cache; fastembed default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Fastembed,
            model: DEFAULT_MODEL.to_string(),
            dimension: 384,
            batch_size: 32,
            cache_dir: None,
        }
    }
}

/// Build an embedder from configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Embedder, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::Fastembed => {
            let provider = FastEmbedProvider::new(&config.model, config.cache_dir.clone())?;
            if provider.dimension() != config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: config.dimension,
                    actual: provider.dimension(),
                });
            }
            Arc::new(provider)
        }
        ProviderKind::Hash => Arc::new(HashEmbeddingProvider::new(config.dimension)),
    };

    info!(
        "Embedder ready: {} ({}D, batch size {})",
        provider.model_name(),
        provider.dimension(),
        config.batch_size
    );

    Ok(Embedder::new(provider, config.batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hash_embedder() {
        let config = EmbeddingConfig {
            provider: ProviderKind::Hash,
            dimension: 48,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.get_embedding_dimension(), 48);
        assert_eq!(embedder.generate_embedding("hello world").unwrap().len(), 48);
    }

    #[test]
    fn test_fastembed_dimension_must_match_model() {
        let config = EmbeddingConfig {
            dimension: 768,
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(EmbeddingError::DimensionMismatch {
                expected: 768,
                actual: 384
            })
        ));
    }
}
