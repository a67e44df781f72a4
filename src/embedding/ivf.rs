//! Inverted-file (IVF) approximate index
//!
//! Vectors are partitioned by k-means into at most [`NLIST`] clusters; a
//! query scans only the [`NPROBE`] clusters whose centroids are closest.
//! Clustering is trained on the first batch added after a reset.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::vector_index::{
    check_batch, check_dimension, nearest, squared_l2, IndexKind, IndexSnapshot, Neighbor,
    SimilarityIndex, VectorIndexError,
};

/// Number of clusters, clamped to the training-set size
pub const NLIST: usize = 100;
/// Clusters scanned per query
pub const NPROBE: usize = 10;
const KMEANS_ITERATIONS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<u64>,
    /// Row-major vectors
    vectors: Vec<f32>,
}

/// Serialized IVF state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfSnapshot {
    pub dimension: usize,
    /// Row-major centroids; empty when untrained
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
}

pub struct IvfIndex {
    dimension: usize,
    centroids: Option<Array2<f32>>,
    lists: Vec<InvertedList>,
    count: usize,
}

impl IvfIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            centroids: None,
            lists: Vec::new(),
            count: 0,
        }
    }

    /// Number of trained clusters (0 before training)
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub(crate) fn from_snapshot(snapshot: IvfSnapshot) -> Result<Self, VectorIndexError> {
        let dimension = snapshot.dimension;
        let nlist = snapshot.lists.len();

        let centroids = if nlist == 0 {
            None
        } else {
            Some(
                Array2::from_shape_vec((nlist, dimension), snapshot.centroids)
                    .map_err(|e| VectorIndexError::InvalidSnapshot(e.to_string()))?,
            )
        };

        let mut count = 0;
        for list in &snapshot.lists {
            if list.vectors.len() != list.ids.len() * dimension {
                return Err(VectorIndexError::InvalidSnapshot(format!(
                    "inverted list holds {} values for {} ids",
                    list.vectors.len(),
                    list.ids.len()
                )));
            }
            count += list.ids.len();
        }

        Ok(Self {
            dimension,
            centroids,
            lists: snapshot.lists,
            count,
        })
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorIndexError> {
        let n = vectors.len();
        let k = NLIST.min(n);

        let mut centroids = Array2::<f32>::zeros((0, self.dimension));
        for i in 0..k {
            centroids
                .push_row(ArrayView1::from(vectors[i * n / k].as_slice()))
                .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;
        }

        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = Array2::<f32>::zeros((k, self.dimension));
            let mut counts = vec![0usize; k];

            for vector in vectors {
                let cluster = closest_centroid(&centroids, vector);
                counts[cluster] += 1;
                sums.row_mut(cluster)
                    .iter_mut()
                    .zip(vector)
                    .for_each(|(s, x)| *s += x);
            }

            let mut moved = false;
            for (cluster, &members) in counts.iter().enumerate() {
                // empty clusters keep their previous centroid
                if members == 0 {
                    continue;
                }
                let mut centroid = centroids.row_mut(cluster);
                for (c, s) in centroid.iter_mut().zip(sums.row(cluster)) {
                    let mean = s / members as f32;
                    if (*c - mean).abs() > f32::EPSILON {
                        moved = true;
                    }
                    *c = mean;
                }
            }
            if !moved {
                break;
            }
        }

        debug!("Trained IVF index: {} clusters from {} vectors", k, n);
        self.centroids = Some(centroids);
        self.lists = vec![InvertedList::default(); k];
        Ok(())
    }
}

impl SimilarityIndex for IvfIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Ivf
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.count
    }

    fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<(), VectorIndexError> {
        check_batch(self.dimension, ids, vectors)?;
        if vectors.is_empty() {
            return Ok(());
        }

        if self.centroids.is_none() {
            self.train(vectors)?;
        }
        let centroids = self
            .centroids
            .as_ref()
            .ok_or_else(|| VectorIndexError::InsertError("IVF index is not trained".to_string()))?;

        for (id, vector) in ids.iter().zip(vectors) {
            let list = &mut self.lists[closest_centroid(centroids, vector)];
            list.ids.push(*id);
            list.vectors.extend_from_slice(vector);
        }
        self.count += ids.len();

        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        check_dimension(self.dimension, query.len())?;

        let Some(centroids) = &self.centroids else {
            return Ok(Vec::new());
        };

        let probes: Vec<Neighbor> = nearest(
            centroids
                .rows()
                .into_iter()
                .enumerate()
                .map(|(i, c)| Neighbor {
                    id: i as u64,
                    distance: squared_l2(c.iter(), query),
                })
                .collect(),
            NPROBE,
        );

        let candidates = probes
            .iter()
            .flat_map(|probe| {
                let list = &self.lists[probe.id as usize];
                list.ids
                    .iter()
                    .zip(list.vectors.chunks_exact(self.dimension))
                    .map(move |(&id, vector)| Neighbor {
                        id,
                        distance: squared_l2(vector, query),
                    })
            })
            .collect();

        Ok(nearest(candidates, k))
    }

    fn reset(&mut self) {
        self.centroids = None;
        self.lists.clear();
        self.count = 0;
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::Ivf(IvfSnapshot {
            dimension: self.dimension,
            centroids: self
                .centroids
                .as_ref()
                .map(|c| c.iter().copied().collect())
                .unwrap_or_default(),
            lists: self.lists.clone(),
        })
    }
}

fn closest_centroid(centroids: &Array2<f32>, vector: &[f32]) -> usize {
    centroids
        .rows()
        .into_iter()
        .map(|c| squared_l2(c.iter(), vector))
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::vector_index::restore;

    /// Deterministic pseudo-random vectors
    fn vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        state = state
                            .wrapping_mul(6_364_136_223_846_793_005)
                            .wrapping_add(1_442_695_040_888_963_407);
                        (state >> 33) as f32 / (1u64 << 31) as f32 - 0.5
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_untrained_search_is_empty() {
        let index = IvfIndex::new(8);
        assert!(index.is_empty());
        assert_eq!(index.nlist(), 0);
        assert!(index.search(&[0.0; 8], 5).unwrap().is_empty());
    }

    #[test]
    fn test_nlist_clamped_to_training_size() {
        let mut index = IvfIndex::new(8);
        let data = vectors(12, 8);
        let ids: Vec<u64> = (0..12).collect();
        index.add_with_ids(&ids, &data).unwrap();
        assert_eq!(index.nlist(), 12);
        assert_eq!(index.len(), 12);
    }

    #[test]
    fn test_exact_match_found() {
        let mut index = IvfIndex::new(16);
        let data = vectors(500, 16);
        let ids: Vec<u64> = (100..600).collect();
        index.add_with_ids(&ids, &data).unwrap();
        assert_eq!(index.nlist(), NLIST);

        for probe in [0usize, 123, 499] {
            let hits = index.search(&data[probe], 3).unwrap();
            assert_eq!(hits[0].id, ids[probe]);
            assert!(hits[0].distance < 1e-6);
        }
    }

    #[test]
    fn test_adds_after_training_use_existing_clusters() {
        let mut index = IvfIndex::new(8);
        let data = vectors(20, 8);
        let ids: Vec<u64> = (0..20).collect();
        index.add_with_ids(&ids[..10], &data[..10]).unwrap();
        index.add_with_ids(&ids[10..], &data[10..]).unwrap();

        assert_eq!(index.nlist(), 10);
        assert_eq!(index.len(), 20);
        assert_eq!(index.search(&data[15], 1).unwrap()[0].id, 15);
    }

    #[test]
    fn test_reset_retrains() {
        let mut index = IvfIndex::new(8);
        let data = vectors(30, 8);
        let ids: Vec<u64> = (0..30).collect();
        index.add_with_ids(&ids, &data).unwrap();
        index.rebuild(&ids[..5], &data[..5]).unwrap();
        assert_eq!(index.nlist(), 5);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut index = IvfIndex::new(8);
        let data = vectors(40, 8);
        let ids: Vec<u64> = (0..40).collect();
        index.add_with_ids(&ids, &data).unwrap();

        let restored = restore(index.snapshot()).unwrap();
        assert_eq!(restored.kind(), IndexKind::Ivf);
        assert_eq!(restored.len(), 40);
        assert_eq!(restored.search(&data[7], 1).unwrap()[0].id, 7);
    }
}
