//! Stored documents and search results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata attached to a stored chunk
///
/// Known keys are typed; anything else goes in `extra`. Serializes as a flat
/// JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    /// Number of keys present. Chunks written by ingestion carry all six
    /// typed keys.
    pub fn len(&self) -> usize {
        [
            self.filename.is_some(),
            self.content_type.is_some(),
            self.chunk_index.is_some(),
            self.start_char.is_some(),
            self.end_char.is_some(),
            self.token_count.is_some(),
        ]
        .iter()
        .filter(|&&present| present)
        .count()
            + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A chunk with its embedding, as stored in the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Unique id, by convention `{asset_id}_{chunk_index}`
    pub id: String,
    pub asset_id: Uuid,
    pub project_id: Uuid,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl VectorDocument {
    /// Conventional document id for a chunk of an asset
    pub fn chunk_id(asset_id: Uuid, chunk_index: usize) -> String {
        format!("{}_{}", asset_id, chunk_index)
    }
}

/// A retrieved document with its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub document: VectorDocument,
    /// Higher is more relevant
    pub score: f32,
    /// Stable index id of the matched vector
    pub faiss_id: u64,
}

/// Optional filters applied to search results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchScope {
    pub project_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
}

impl SearchScope {
    pub fn project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            asset_id: None,
        }
    }

    pub fn asset(asset_id: Uuid) -> Self {
        Self {
            project_id: None,
            asset_id: Some(asset_id),
        }
    }
}
