use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::{model_dimension, ProviderKind};
use crate::error::{MarketragError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_vector_store(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MarketragError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        } else if chunking.chunk_overlap >= chunking.chunk_size {
            errors.push(ValidationError::new(
                "chunking.chunk_overlap",
                format!(
                    "Chunk overlap ({}) must be smaller than chunk size ({})",
                    chunking.chunk_overlap, chunking.chunk_size
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
            return;
        }

        if embedding.provider == ProviderKind::Fastembed {
            match model_dimension(&embedding.model) {
                None => errors.push(ValidationError::new(
                    "embedding.model",
                    format!("Unsupported embedding model: {}", embedding.model),
                )),
                Some(dim) if dim != embedding.dimension => errors.push(ValidationError::new(
                    "embedding.dimension",
                    format!(
                        "Model {} produces {}-dimensional vectors, configured {}",
                        embedding.model, dim, embedding.dimension
                    ),
                )),
                Some(_) => {}
            }
        }
    }

    fn validate_vector_store(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.vector_store.overfetch == 0 {
            errors.push(ValidationError::new(
                "vector_store.overfetch",
                "Overfetch factor must be at least 1",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if config.retrieval.rerank_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.rerank_multiplier",
                "Re-rank multiplier must be at least 1",
            ));
        }
    }
}
