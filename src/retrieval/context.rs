//! Flat context records handed to the generation layer

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{DocumentMetadata, SearchResult};

/// A retrieved chunk flattened for prompt assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub text: String,
    /// Relevance score (higher is better)
    pub score: f32,
    pub asset_id: Uuid,
    pub project_id: Uuid,
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl ContextRecord {
    pub fn from_result(result: SearchResult, include_metadata: bool) -> Self {
        let document = result.document;
        Self {
            text: document.text,
            score: result.score,
            asset_id: document.asset_id,
            project_id: document.project_id,
            chunk_index: document.chunk_index,
            metadata: if include_metadata {
                document.metadata
            } else {
                None
            },
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.text[..idx]),
            None => self.text.clone(),
        }
    }
}
