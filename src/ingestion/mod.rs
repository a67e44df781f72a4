//! Ingestion pipeline: normalize, chunk, embed, store
//!
//! Re-ingesting an asset replaces its previous chunks in a single store
//! transaction, so a failed run leaves the earlier vectors in place.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::chunking::{Chunker, TextChunk};
use crate::embedding::{Embedder, EmbeddingError};
use crate::storage::{DocumentMetadata, VectorDocument, VectorStore, VectorStoreError};

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("No text content found in asset {asset_id} after normalization")]
    EmptyContent { asset_id: Uuid },

    #[error("Failed to generate embeddings for asset {asset_id}: {source}")]
    Embedding {
        asset_id: Uuid,
        source: EmbeddingError,
    },

    #[error("Embedding count mismatch for asset {asset_id}: expected {expected}, got {actual}")]
    CountMismatch {
        asset_id: Uuid,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to store vectors for asset {asset_id}: {source}")]
    Store {
        asset_id: Uuid,
        source: VectorStoreError,
    },
}

/// Identity and descriptive fields of the asset being ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSource {
    pub asset_id: Uuid,
    pub project_id: Uuid,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Content type recorded when the asset source does not name one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Summary of one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub chunk_count: usize,
    pub total_tokens: usize,
}

/// Trim every line, drop blank lines, and collapse runs of spaces
pub fn normalize_text(raw: &str) -> String {
    let joined = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut normalized = String::with_capacity(joined.len());
    let mut previous_space = false;
    for c in joined.chars() {
        if c == ' ' && previous_space {
            continue;
        }
        previous_space = c == ' ';
        normalized.push(c);
    }
    normalized
}

/// Metadata stored with every chunk. All six keys are always filled: a
/// missing filename falls back to the asset id and a missing content type to
/// [`DEFAULT_CONTENT_TYPE`].
fn chunk_metadata(source: &AssetSource, chunk: &TextChunk) -> DocumentMetadata {
    DocumentMetadata {
        filename: Some(
            source
                .filename
                .clone()
                .unwrap_or_else(|| source.asset_id.to_string()),
        ),
        content_type: Some(
            source
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        ),
        chunk_index: Some(chunk.chunk_index),
        start_char: Some(chunk.start_char),
        end_char: Some(chunk.end_char),
        token_count: Some(chunk.token_count),
        ..Default::default()
    }
}

pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
}

impl Ingestor {
    pub fn new(chunker: Chunker, embedder: Arc<Embedder>, store: Arc<VectorStore>) -> Self {
        Self {
            chunker,
            embedder,
            store,
        }
    }

    /// Ingest extracted text for an asset, replacing any earlier chunks
    pub fn ingest_text(
        &self,
        source: &AssetSource,
        raw_text: &str,
    ) -> Result<IngestionReport, IngestionError> {
        let result = self.ingest_inner(source, raw_text);
        if let Err(e) = &result {
            error!("Ingestion failed: {}", e);
        }
        result
    }

    fn ingest_inner(
        &self,
        source: &AssetSource,
        raw_text: &str,
    ) -> Result<IngestionReport, IngestionError> {
        let asset_id = source.asset_id;
        info!(
            "Starting ingestion for asset {} in project {}",
            asset_id, source.project_id
        );

        let text = normalize_text(raw_text);
        let chunks = self.chunker.chunk_text(&text);
        if chunks.is_empty() {
            return Err(IngestionError::EmptyContent { asset_id });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .generate_embeddings_batch(&texts)
            .map_err(|source| IngestionError::Embedding { asset_id, source })?;

        if embeddings.len() != chunks.len() {
            return Err(IngestionError::CountMismatch {
                asset_id,
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }

        let total_tokens = chunks.iter().map(|c| c.token_count).sum();
        let documents: Vec<VectorDocument> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorDocument {
                id: VectorDocument::chunk_id(asset_id, chunk.chunk_index),
                asset_id,
                project_id: source.project_id,
                chunk_index: chunk.chunk_index,
                metadata: Some(chunk_metadata(source, &chunk)),
                text: chunk.text,
                embedding,
            })
            .collect();

        let report = IngestionReport {
            chunk_count: documents.len(),
            total_tokens,
        };

        self.store
            .replace_asset(asset_id, &documents)
            .map_err(|source| IngestionError::Store { asset_id, source })?;

        info!(
            "Ingested asset {}: {} chunks, {} tokens",
            asset_id, report.chunk_count, report.total_tokens
        );
        Ok(report)
    }
}
