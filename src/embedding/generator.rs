/// Embedding generation on top of a provider
use super::{EmbeddingError, EmbeddingProvider};
use std::sync::Arc;
use tracing::debug;

/// Embedding generator
///
/// Wraps a provider and:
/// - returns zero vectors for empty input without calling the provider
/// - sends non-empty texts in batches of `batch_size`
/// - L2-normalizes and dimension-checks every output vector
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    /// Create a new embedder
    ///
    /// # Arguments
    /// * `provider` - Embedding provider
    /// * `batch_size` - Number of texts sent to the provider in one call
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Dimension of every vector this embedder produces
    pub fn get_embedding_dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a single text. Empty or whitespace-only text yields the zero
    /// vector.
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(self.zero_vector());
        }

        let mut embeddings = self.embed_checked(&[text.to_string()])?;
        embeddings.pop().ok_or_else(|| {
            EmbeddingError::GenerationError("No embeddings generated".to_string())
        })
    }

    /// Embed many texts, one vector per input in input order.
    ///
    /// Empty entries become zero vectors and are never sent to the provider.
    pub fn generate_embeddings_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let positions: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        debug!(
            "Embedding {} texts ({} empty) in batches of {}",
            texts.len(),
            texts.len() - positions.len(),
            self.batch_size
        );

        for batch in positions.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let embeddings = self.embed_checked(&batch_texts)?;
            for (&i, embedding) in batch.iter().zip(embeddings) {
                results[i] = Some(embedding);
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| self.zero_vector()))
            .collect())
    }

    fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let embeddings = self.provider.embed_batch(texts)?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let expected = self.get_embedding_dimension();
        embeddings
            .into_iter()
            .map(|embedding| {
                if embedding.len() != expected {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
                Ok(normalize(embedding))
            })
            .collect()
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.get_embedding_dimension()]
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model_name())
            .field("dimension", &self.provider.dimension())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// True for the all-zero vector, which carries no semantic content and must
/// not be ranked by similarity
pub fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|&x| x == 0.0)
}

/// Scale to unit length; the zero vector is returned unchanged
fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use std::sync::Mutex;

    /// Records every batch it receives
    struct RecordingProvider {
        inner: HashEmbeddingProvider,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingProvider {
        fn new(dimension: usize) -> Self {
            Self {
                inner: HashEmbeddingProvider::new(dimension),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl EmbeddingProvider for RecordingProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            self.inner.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
    }

    /// Returns vectors of the wrong size
    struct BrokenProvider;

    impl EmbeddingProvider for BrokenProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
        }

        fn dimension(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    fn embedder(batch_size: usize) -> (Embedder, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::new(64));
        (Embedder::new(provider.clone(), batch_size), provider)
    }

    #[test]
    fn test_is_zero_vector() {
        assert!(is_zero_vector(&[0.0; 4]));
        assert!(is_zero_vector(&[]));
        assert!(!is_zero_vector(&[0.0, 0.0, 1e-7]));

        let (embedder, _) = embedder(4);
        assert!(is_zero_vector(&embedder.generate_embedding("???").unwrap()));
        assert!(!is_zero_vector(&embedder.generate_embedding("launch plan").unwrap()));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let (embedder, provider) = embedder(4);
        let v = embedder.generate_embedding("   ").unwrap();
        assert_eq!(v.len(), embedder.get_embedding_dimension());
        assert!(v.iter().all(|&x| x == 0.0));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_embedding_is_normalized_and_deterministic() {
        let (embedder, _) = embedder(4);
        let a = embedder.generate_embedding("brand awareness campaign").unwrap();
        let b = embedder.generate_embedding("brand awareness campaign").unwrap();
        assert_eq!(a, b);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batch_matches_single() {
        let (embedder, _) = embedder(2);
        let texts = vec![
            "first text".to_string(),
            "second text".to_string(),
            "third text".to_string(),
        ];
        let batch = embedder.generate_embeddings_batch(&texts).unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            let single = embedder.generate_embedding(text).unwrap();
            for (x, y) in single.iter().zip(vector) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_batch_interleaves_zero_vectors() {
        let (embedder, provider) = embedder(2);
        let texts = vec![
            "alpha".to_string(),
            "".to_string(),
            "beta".to_string(),
            "  ".to_string(),
            "gamma".to_string(),
        ];
        let batch = embedder.generate_embeddings_batch(&texts).unwrap();
        assert_eq!(batch.len(), 5);
        assert!(batch[1].iter().all(|&x| x == 0.0));
        assert!(batch[3].iter().all(|&x| x == 0.0));
        assert!(batch[0].iter().any(|&x| x != 0.0));

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(calls[1], vec!["gamma".to_string()]);
    }

    #[test]
    fn test_empty_batch() {
        let (embedder, provider) = embedder(4);
        assert!(embedder.generate_embeddings_batch(&[]).unwrap().is_empty());
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let embedder = Embedder::new(Arc::new(BrokenProvider), 4);
        let result = embedder.generate_embedding("text");
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 3
            })
        ));
    }
}
