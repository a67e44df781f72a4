//! Vector store
//!
//! Embeddings live in two places: a SQLite table that is the source of truth
//! and an in-memory similarity index persisted as a side-car file. Every
//! vector has a stable `faiss_id` linking the two. Ids are allocated from a
//! persisted high-water mark and are never reused.

pub mod database;
mod document;
pub mod snapshot;

pub use database::{Database, DbPool};
pub use document::{DocumentMetadata, SearchResult, SearchScope, VectorDocument};

use ahash::AHashSet;
use chrono::Utc;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::embedding::{
    is_zero_vector, new_index, restore, IndexKind, SimilarityIndex, VectorIndexError,
};

/// Default embedding dimension
pub const DEFAULT_DIMENSION: usize = 384;
/// Candidates fetched from the index per requested result
pub const DEFAULT_OVERFETCH: usize = 3;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Dimension mismatch in {operation}: expected {expected}, got {actual}")]
    DimensionMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid document {id}: {message}")]
    InvalidDocument { id: String, message: String },

    #[error("Invalid vector store configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error during {operation}: {source}")]
    Database {
        operation: String,
        source: rusqlite::Error,
    },

    #[error("Connection pool error: {0}")]
    Pool(r2d2::Error),

    #[error("Index error during {operation}: {source}")]
    Index {
        operation: String,
        source: VectorIndexError,
    },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Vector index lock poisoned")]
    LockPoisoned,
}

impl VectorStoreError {
    /// True for caller mistakes (bad input), false for storage failures
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VectorStoreError::DimensionMismatch { .. }
                | VectorStoreError::InvalidDocument { .. }
                | VectorStoreError::InvalidConfig(_)
        )
    }
}

fn db_err(operation: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> VectorStoreError {
    let operation = operation.into();
    move |source| VectorStoreError::Database { operation, source }
}

fn index_err(operation: impl Into<String>) -> impl FnOnce(VectorIndexError) -> VectorStoreError {
    let operation = operation.into();
    move |source| VectorStoreError::Index { operation, source }
}

fn logged<T>(operation: &str, result: Result<T, VectorStoreError>) -> Result<T, VectorStoreError> {
    if let Err(e) = &result {
        if e.is_validation() {
            warn!("{} rejected: {}", operation, e);
        } else {
            error!("{} failed: {}", operation, e);
        }
    }
    result
}

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// SQLite database file; the index side-car sits next to it
    pub db_path: PathBuf,
    pub dimension: usize,
    pub index_type: IndexKind,
    pub overfetch: usize,
}

impl VectorStoreConfig {
    pub fn new(db_path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            db_path: db_path.into(),
            dimension,
            index_type: IndexKind::Flat,
            overfetch: DEFAULT_OVERFETCH,
        }
    }

    pub fn with_index_type(mut self, index_type: IndexKind) -> Self {
        self.index_type = index_type;
        self
    }
}

/// SQLite-backed vector store with a rebuildable similarity index
///
/// Reads share the index under a read lock. Writers hold the write lock for
/// the whole operation, so table, index and side-car file change together.
pub struct VectorStore {
    db: Database,
    index: RwLock<Box<dyn SimilarityIndex>>,
    index_path: PathBuf,
    dimension: usize,
    overfetch: usize,
}

impl VectorStore {
    /// Open the store, loading the side-car index or rebuilding it from the
    /// table when it is missing, unreadable or stale.
    pub fn open(config: VectorStoreConfig) -> Result<Self, VectorStoreError> {
        logged("open", Self::open_inner(config))
    }

    fn open_inner(config: VectorStoreConfig) -> Result<Self, VectorStoreError> {
        if config.dimension == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if config.overfetch == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "overfetch must be at least 1".to_string(),
            ));
        }

        let db = Database::open(&config.db_path)?;
        let index_path = snapshot::index_path(&config.db_path);
        let conn = db.get_conn()?;
        let fingerprint = database::fingerprint(&conn, config.dimension).map_err(db_err("open"))?;

        let index = match Self::load_side_car(&index_path, &fingerprint, &config) {
            Some(index) => {
                info!(
                    "Loaded {} index with {} vectors from {}",
                    index.kind(),
                    index.len(),
                    index_path.display()
                );
                index
            }
            None => {
                let mut index = new_index(config.index_type, config.dimension);
                rebuild_from_table(index.as_mut(), &conn, "open")?;
                snapshot::save(&index_path, &fingerprint, &index.snapshot())?;
                index
            }
        };
        drop(conn);

        Ok(Self {
            db,
            index: RwLock::new(index),
            index_path,
            dimension: config.dimension,
            overfetch: config.overfetch,
        })
    }

    fn load_side_car(
        path: &Path,
        fingerprint: &str,
        config: &VectorStoreConfig,
    ) -> Option<Box<dyn SimilarityIndex>> {
        let file = match snapshot::load(path) {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("No index file at {}, building from table", path.display());
                return None;
            }
            Err(e) => {
                warn!("Unreadable index file {}: {}. Rebuilding", path.display(), e);
                return None;
            }
        };

        if file.snapshot.kind() != config.index_type
            || file.snapshot.dimension() != config.dimension
        {
            warn!(
                "Index file {} is a {}D {} index, configured {}D {}. Rebuilding",
                path.display(),
                file.snapshot.dimension(),
                file.snapshot.kind(),
                config.dimension,
                config.index_type
            );
            return None;
        }
        if file.fingerprint != fingerprint {
            warn!("Index file {} is stale. Rebuilding", path.display());
            return None;
        }

        match restore(file.snapshot) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("Invalid index snapshot in {}: {}. Rebuilding", path.display(), e);
                None
            }
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Number of vectors in the similarity index
    pub fn index_len(&self) -> Result<usize, VectorStoreError> {
        Ok(self.read_index()?.len())
    }

    /// Add documents. Existing documents with the same id are replaced.
    ///
    /// The whole batch is validated before anything is written; rows are
    /// committed in one transaction before the index is touched.
    pub fn add_documents(&self, documents: &[VectorDocument]) -> Result<(), VectorStoreError> {
        logged("add_documents", self.add_documents_inner(documents))
    }

    fn add_documents_inner(&self, documents: &[VectorDocument]) -> Result<(), VectorStoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.validate_documents(documents, "add_documents")?;

        let mut index = self.write_index()?;
        let mut conn = self.db.get_conn()?;

        let tx = conn.transaction().map_err(db_err("add_documents"))?;
        let (ids, replaced) = insert_batch(&tx, documents, "add_documents")?;
        tx.commit().map_err(db_err("add_documents"))?;

        if replaced > 0 {
            debug!("Replaced {} existing documents, rebuilding index", replaced);
            rebuild_from_table(index.as_mut(), &conn, "add_documents")?;
        } else {
            let vectors: Vec<Vec<f32>> = documents.iter().map(|d| d.embedding.clone()).collect();
            index
                .add_with_ids(&ids, &vectors)
                .map_err(index_err("add_documents"))?;
        }
        self.persist(index.as_ref(), &conn, "add_documents")?;

        info!(
            "Added {} documents (faiss ids {}..={})",
            documents.len(),
            ids[0],
            ids[ids.len() - 1]
        );
        Ok(())
    }

    /// Replace every document of `asset_id` with `documents` in one
    /// transaction. Returns the number of rows removed. On failure the old
    /// documents remain.
    pub fn replace_asset(
        &self,
        asset_id: Uuid,
        documents: &[VectorDocument],
    ) -> Result<usize, VectorStoreError> {
        logged(
            &format!("replace_asset({})", asset_id),
            self.replace_asset_inner(asset_id, documents),
        )
    }

    fn replace_asset_inner(
        &self,
        asset_id: Uuid,
        documents: &[VectorDocument],
    ) -> Result<usize, VectorStoreError> {
        let operation = format!("replace_asset({})", asset_id);
        self.validate_documents(documents, &operation)?;
        if let Some(doc) = documents.iter().find(|d| d.asset_id != asset_id) {
            return Err(VectorStoreError::InvalidDocument {
                id: doc.id.clone(),
                message: format!("belongs to asset {}, not {}", doc.asset_id, asset_id),
            });
        }

        let mut index = self.write_index()?;
        let mut conn = self.db.get_conn()?;

        let tx = conn.transaction().map_err(db_err(&operation))?;
        let removed = database::delete_by_asset(&tx, asset_id).map_err(db_err(&operation))?;
        let (_, replaced) = insert_batch(&tx, documents, &operation)?;
        tx.commit().map_err(db_err(&operation))?;

        rebuild_from_table(index.as_mut(), &conn, &operation)?;
        self.persist(index.as_ref(), &conn, &operation)?;

        info!(
            "Replaced asset {}: removed {} documents, added {}",
            asset_id,
            removed + replaced,
            documents.len()
        );
        Ok(removed + replaced)
    }

    /// Nearest documents to `query`, optionally restricted by `scope`.
    ///
    /// Scores are `1 / (1 + squared L2 distance)`, highest first. Zero
    /// vectors carry no semantic content: a zero query returns nothing and
    /// stored zero vectors are never returned.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        logged("search", self.search_inner(query, top_k, scope))
    }

    fn search_inner(
        &self,
        query: &[f32],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                operation: "search".to_string(),
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if is_zero_vector(query) {
            debug!("Zero query vector, nothing to rank");
            return Ok(Vec::new());
        }

        let index = self.read_index()?;
        if top_k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }

        let k = top_k.saturating_mul(self.overfetch).min(index.len());
        let neighbors = index.search(query, k).map_err(index_err("search"))?;

        let conn = self.db.get_conn()?;
        let faiss_ids: Vec<u64> = neighbors.iter().map(|n| n.id).collect();
        let mut documents =
            database::fetch_by_faiss_ids(&conn, &faiss_ids, scope).map_err(db_err("search"))?;
        drop(index);

        let mut results: Vec<SearchResult> = neighbors
            .into_iter()
            .filter_map(|n| {
                documents
                    .remove(&n.id)
                    .filter(|document| !is_zero_vector(&document.embedding))
                    .map(|document| SearchResult {
                        document,
                        score: 1.0 / (1.0 + n.distance),
                        faiss_id: n.id,
                    })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.faiss_id.cmp(&b.faiss_id))
        });
        results.truncate(top_k);

        debug!(
            "Vector search: {} candidates, {} results in scope",
            k,
            results.len()
        );
        Ok(results)
    }

    /// Delete every document of an asset. Returns the number removed.
    pub fn delete_by_asset(&self, asset_id: Uuid) -> Result<usize, VectorStoreError> {
        let operation = format!("delete_by_asset({})", asset_id);
        logged(
            &operation,
            self.delete_where(&operation, |conn| database::delete_by_asset(conn, asset_id)),
        )
    }

    /// Delete every document of a project. Returns the number removed.
    pub fn delete_by_project(&self, project_id: Uuid) -> Result<usize, VectorStoreError> {
        let operation = format!("delete_by_project({})", project_id);
        logged(
            &operation,
            self.delete_where(&operation, |conn| {
                database::delete_by_project(conn, project_id)
            }),
        )
    }

    fn delete_where(
        &self,
        operation: &str,
        delete: impl FnOnce(&Connection) -> rusqlite::Result<usize>,
    ) -> Result<usize, VectorStoreError> {
        let mut index = self.write_index()?;
        let mut conn = self.db.get_conn()?;

        let tx = conn.transaction().map_err(db_err(operation))?;
        let removed = delete(&*tx).map_err(db_err(operation))?;
        tx.commit().map_err(db_err(operation))?;

        if removed > 0 {
            rebuild_from_table(index.as_mut(), &conn, operation)?;
            self.persist(index.as_ref(), &conn, operation)?;
        }

        info!("{}: removed {} documents", operation, removed);
        Ok(removed)
    }

    /// Exact number of stored documents, optionally within one project
    pub fn get_document_count(&self, project_id: Option<Uuid>) -> Result<usize, VectorStoreError> {
        let result = self.db.get_conn().and_then(|conn| {
            database::count(&conn, project_id).map_err(db_err("get_document_count"))
        });
        logged("get_document_count", result)
    }

    /// Remove all documents. Ids already handed out stay retired.
    pub fn clear(&self) -> Result<(), VectorStoreError> {
        logged("clear", self.clear_inner())
    }

    fn clear_inner(&self) -> Result<(), VectorStoreError> {
        let mut index = self.write_index()?;
        let mut conn = self.db.get_conn()?;

        let tx = conn.transaction().map_err(db_err("clear"))?;
        let next = database::next_faiss_id(&tx).map_err(db_err("clear"))?;
        let removed = database::delete_all(&tx).map_err(db_err("clear"))?;
        database::set_next_faiss_id(&tx, next).map_err(db_err("clear"))?;
        tx.commit().map_err(db_err("clear"))?;

        index.reset();
        self.persist(index.as_ref(), &conn, "clear")?;

        info!("Cleared vector store ({} documents)", removed);
        Ok(())
    }

    fn validate_documents(
        &self,
        documents: &[VectorDocument],
        operation: &str,
    ) -> Result<(), VectorStoreError> {
        let mut seen = AHashSet::with_capacity(documents.len());
        for doc in documents {
            if doc.embedding.len() != self.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    operation: format!("{} (document {})", operation, doc.id),
                    expected: self.dimension,
                    actual: doc.embedding.len(),
                });
            }
            if !seen.insert(doc.id.as_str()) {
                return Err(VectorStoreError::InvalidDocument {
                    id: doc.id.clone(),
                    message: "duplicate id in batch".to_string(),
                });
            }
        }
        Ok(())
    }

    fn persist(
        &self,
        index: &dyn SimilarityIndex,
        conn: &Connection,
        operation: &str,
    ) -> Result<(), VectorStoreError> {
        let fingerprint = database::fingerprint(conn, self.dimension).map_err(db_err(operation))?;
        snapshot::save(&self.index_path, &fingerprint, &index.snapshot())
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, Box<dyn SimilarityIndex>>, VectorStoreError> {
        self.index.read().map_err(|_| VectorStoreError::LockPoisoned)
    }

    fn write_index(
        &self,
    ) -> Result<RwLockWriteGuard<'_, Box<dyn SimilarityIndex>>, VectorStoreError> {
        self.index.write().map_err(|_| VectorStoreError::LockPoisoned)
    }
}

/// Insert `documents` with fresh faiss ids, replacing rows with the same
/// document id. Returns the allocated ids and the number of replaced rows.
fn insert_batch(
    conn: &Connection,
    documents: &[VectorDocument],
    operation: &str,
) -> Result<(Vec<u64>, usize), VectorStoreError> {
    let first = database::next_faiss_id(conn).map_err(db_err(operation))?;
    let replaced = database::delete_ids(conn, documents.iter().map(|d| d.id.as_str()))
        .map_err(db_err(operation))?;

    let created_at = Utc::now().to_rfc3339();
    let ids: Vec<u64> = (first..first + documents.len() as u64).collect();
    for (doc, &faiss_id) in documents.iter().zip(&ids) {
        database::insert_document(conn, doc, faiss_id, &created_at).map_err(db_err(operation))?;
    }
    database::set_next_faiss_id(conn, first + documents.len() as u64)
        .map_err(db_err(operation))?;

    Ok((ids, replaced))
}

/// Rebuild `index` from every stored vector, in `faiss_id` order
fn rebuild_from_table(
    index: &mut dyn SimilarityIndex,
    conn: &Connection,
    operation: &str,
) -> Result<(), VectorStoreError> {
    let (ids, vectors) = database::load_vectors(conn).map_err(db_err(operation))?;
    index.rebuild(&ids, &vectors).map_err(index_err(operation))?;
    info!("Rebuilt {} index with {} vectors", index.kind(), ids.len());
    Ok(())
}
