//! Semantic search over the vector store

use crate::config::RetrievalConfig;
use crate::embedding::{is_zero_vector, Embedder, EmbeddingError};
use crate::retrieval::{rerank_results, ContextRecord, SearchQuery};
use crate::storage::{SearchResult, SearchScope, VectorStore, VectorStoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Search task failed: {0}")]
    Task(String),
}

/// Semantic searcher: embeds the query, searches the store, re-ranks
pub struct SemanticSearcher {
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
    config: RetrievalConfig,
}

impl SemanticSearcher {
    pub fn new(embedder: Arc<Embedder>, store: Arc<VectorStore>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    /// Search for chunks relevant to the query.
    ///
    /// An empty query returns no results without touching the embedder.
    /// Embedding and store lookups run on the blocking thread pool.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let result = self.search_inner(query).await;
        if let Err(e) = &result {
            error!("Search for {:?} failed: {}", query.text, e);
        }
        result
    }

    async fn search_inner(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let text = query.text.trim();
        if text.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let fetch_limit = if query.rerank {
            query.limit.saturating_mul(self.config.rerank_multiplier.max(1))
        } else {
            query.limit
        };

        let embedder = Arc::clone(&self.embedder);
        let store = Arc::clone(&self.store);
        let text = text.to_string();
        let scope = SearchScope {
            project_id: query.project_id,
            asset_id: query.asset_id,
        };

        let candidates = tokio::task::spawn_blocking(move || -> Result<_, SearchError> {
            let embedding = embedder.generate_embedding(&text)?;
            if is_zero_vector(&embedding) {
                debug!("Query {:?} has no semantic content, skipping search", text);
                return Ok(Vec::new());
            }
            Ok(store.search(&embedding, fetch_limit, &scope)?)
        })
        .await
        .map_err(|e| SearchError::Task(e.to_string()))??;

        let candidate_count = candidates.len();
        let mut results = if query.rerank && candidate_count > 1 {
            rerank_results(&query.text, &candidates)
        } else {
            candidates
        };
        results.truncate(query.limit);

        debug!(
            "Search {:?}: {} candidates, {} results (rerank: {})",
            query.text,
            candidate_count,
            results.len(),
            query.rerank
        );

        Ok(results)
    }

    /// Search and flatten results into context records. Always re-ranks.
    pub async fn search_with_context(
        &self,
        query: &SearchQuery,
        include_metadata: bool,
    ) -> Result<Vec<ContextRecord>, SearchError> {
        let query = SearchQuery {
            rerank: true,
            ..query.clone()
        };
        let results = self.search(&query).await?;

        Ok(results
            .into_iter()
            .map(|r| ContextRecord::from_result(r, include_metadata))
            .collect())
    }

    /// Query with the configured defaults (`retrieval.top_k`, `retrieval.rerank`)
    pub fn query(&self, text: impl Into<String>) -> SearchQuery {
        SearchQuery::new(text, self.config.top_k).with_rerank(self.config.rerank)
    }
}
