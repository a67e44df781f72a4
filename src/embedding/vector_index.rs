/// Similarity indexes over embedding vectors
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::ivf::{IvfIndex, IvfSnapshot};

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Unknown index type: {0} (expected 'flat' or 'ivf')")]
    UnknownKind(String),
}

/// Index implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force search
    #[default]
    Flat,
    /// Inverted-file approximate search
    Ivf,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Flat => write!(f, "flat"),
            IndexKind::Ivf => write!(f, "ivf"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = VectorIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(IndexKind::Flat),
            "ivf" => Ok(IndexKind::Ivf),
            other => Err(VectorIndexError::UnknownKind(other.to_string())),
        }
    }
}

/// Nearest-neighbor hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Stable vector id (`faiss_id`)
    pub id: u64,
    /// Squared L2 distance to the query
    pub distance: f32,
}

/// Serializable index state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexSnapshot {
    Flat {
        dimension: usize,
        ids: Vec<u64>,
        /// Row-major vectors, `ids.len() * dimension` values
        vectors: Vec<f32>,
    },
    Ivf(IvfSnapshot),
}

impl IndexSnapshot {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexSnapshot::Flat { .. } => IndexKind::Flat,
            IndexSnapshot::Ivf(_) => IndexKind::Ivf,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            IndexSnapshot::Flat { dimension, .. } => *dimension,
            IndexSnapshot::Ivf(snapshot) => snapshot.dimension,
        }
    }
}

/// Vector similarity index keyed by caller-assigned `u64` ids
///
/// Distances are squared L2. Implementations never assign ids themselves.
pub trait SimilarityIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn dimension(&self) -> usize;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add vectors under the given ids
    fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<(), VectorIndexError>;

    /// `k` nearest neighbors, closest first
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError>;

    /// Remove everything
    fn reset(&mut self);

    /// Replace the contents with exactly these vectors
    fn rebuild(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<(), VectorIndexError> {
        self.reset();
        self.add_with_ids(ids, vectors)
    }

    fn snapshot(&self) -> IndexSnapshot;
}

/// Create an empty index of the given kind
pub fn new_index(kind: IndexKind, dimension: usize) -> Box<dyn SimilarityIndex> {
    match kind {
        IndexKind::Flat => Box::new(FlatIndex::new(dimension)),
        IndexKind::Ivf => Box::new(IvfIndex::new(dimension)),
    }
}

/// Rebuild an index from a snapshot
pub fn restore(snapshot: IndexSnapshot) -> Result<Box<dyn SimilarityIndex>, VectorIndexError> {
    match snapshot {
        IndexSnapshot::Flat {
            dimension,
            ids,
            vectors,
        } => Ok(Box::new(FlatIndex::from_parts(dimension, ids, vectors)?)),
        IndexSnapshot::Ivf(snapshot) => Ok(Box::new(IvfIndex::from_snapshot(snapshot)?)),
    }
}

/// Exact index: one matrix row per vector, scanned in full on search
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<u64>,
    vectors: Array2<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Array2::zeros((0, dimension)),
        }
    }

    fn from_parts(
        dimension: usize,
        ids: Vec<u64>,
        vectors: Vec<f32>,
    ) -> Result<Self, VectorIndexError> {
        let vectors = Array2::from_shape_vec((ids.len(), dimension), vectors)
            .map_err(|e| VectorIndexError::InvalidSnapshot(e.to_string()))?;
        Ok(Self {
            dimension,
            ids,
            vectors,
        })
    }
}

impl SimilarityIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<(), VectorIndexError> {
        check_batch(self.dimension, ids, vectors)?;

        for (id, vector) in ids.iter().zip(vectors) {
            self.vectors
                .push_row(ArrayView1::from(vector.as_slice()))
                .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;
            self.ids.push(*id);
        }

        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        check_dimension(self.dimension, query.len())?;

        let candidates = self
            .vectors
            .rows()
            .into_iter()
            .zip(&self.ids)
            .map(|(row, &id)| Neighbor {
                id,
                distance: squared_l2(row.iter(), query),
            })
            .collect();

        Ok(nearest(candidates, k))
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.vectors = Array2::zeros((0, self.dimension));
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::Flat {
            dimension: self.dimension,
            ids: self.ids.clone(),
            vectors: self.vectors.iter().copied().collect(),
        }
    }
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), VectorIndexError> {
    if expected != actual {
        return Err(VectorIndexError::InvalidDimension { expected, actual });
    }
    Ok(())
}

pub(crate) fn check_batch(
    dimension: usize,
    ids: &[u64],
    vectors: &[Vec<f32>],
) -> Result<(), VectorIndexError> {
    if ids.len() != vectors.len() {
        return Err(VectorIndexError::InsertError(format!(
            "{} ids for {} vectors",
            ids.len(),
            vectors.len()
        )));
    }
    vectors
        .iter()
        .try_for_each(|v| check_dimension(dimension, v.len()))
}

/// Squared Euclidean distance; `a` may be a slice or an ndarray row
pub(crate) fn squared_l2<'a>(a: impl IntoIterator<Item = &'a f32>, b: &[f32]) -> f32 {
    a.into_iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Sort by distance (ties by id) and keep the first `k`
pub(crate) fn nearest(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    candidates.truncate(k);
    candidates
}
