//! Semantic Retrieval & Re-ranking
//!
//! Embeds a query, searches the vector store with optional project/asset
//! scoping, and re-ranks candidates with keyword, length and metadata
//! heuristics.

mod context;
mod reranker;
mod semantic;

pub use context::ContextRecord;
pub use reranker::rerank_results;
pub use semantic::{SearchError, SemanticSearcher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Search query with optional filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Maximum number of results
    pub limit: usize,

    /// Optional project filter
    pub project_id: Option<Uuid>,

    /// Optional asset filter
    pub asset_id: Option<Uuid>,

    /// Apply heuristic re-ranking
    pub rerank: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            project_id: None,
            asset_id: None,
            rerank: true,
        }
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_asset(mut self, asset_id: Uuid) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }
}
