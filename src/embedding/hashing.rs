//! Deterministic offline embedding provider

use super::{EmbeddingError, EmbeddingProvider};

/// Feature-hashing embedding provider
///
/// Hashes lower-cased word unigrams and character trigrams into a fixed
/// number of buckets with BLAKE3, using one hash bit as the sign. Texts that
/// share vocabulary land close together. No model download, fully
/// deterministic; suitable for offline use and tests.
pub struct HashEmbeddingProvider {
    dimension: usize,
    model_name: String,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_name: format!("hash-{}", dimension),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for word in lowered.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }
            self.accumulate(&mut vector, b"w", word, 1.0);

            let chars: Vec<char> = format!("#{}#", word).chars().collect();
            for trigram in chars.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.accumulate(&mut vector, b"t", &trigram, 0.5);
            }
        }

        vector
    }

    fn accumulate(&self, vector: &mut [f32], namespace: &[u8], feature: &str, weight: f32) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace);
        hasher.update(feature.as_bytes());
        let hash = hasher.finalize();
        let bytes = hash.as_bytes();

        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };

        vector[index] += sign * weight;
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "hash provider dimension must be greater than 0".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
