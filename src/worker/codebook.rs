//! Codebook and nearest-neighbor search.
//!
//! Distances are squared Euclidean. For each query row the K smallest distances are
//! selected first, then ordered ascending with ties broken by centroid index.

use crate::task::types::Neighbor;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodebookError {
    #[error("codebook has no centroids")]
    Empty,

    #[error("centroid {index} has {got} dimensions, expected {expected}")]
    RaggedCentroid {
        index: usize,
        got: usize,
        expected: usize,
    },

    #[error("query row has {got} dimensions, codebook has {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("reading codebook {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing codebook {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk shape of a codebook file.
#[derive(Debug, Serialize, Deserialize)]
pub struct CodebookFile {
    pub centroids: Vec<Vec<f32>>,
}

/// The fixed set of reference centroids, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Codebook {
    centroids: Vec<Vec<f32>>,
    dim: usize,
}

impl Codebook {
    pub fn new(centroids: Vec<Vec<f32>>) -> Result<Self, CodebookError> {
        let dim = centroids.first().map(Vec::len).ok_or(CodebookError::Empty)?;
        if let Some((index, c)) = centroids.iter().enumerate().find(|(_, c)| c.len() != dim) {
            return Err(CodebookError::RaggedCentroid {
                index,
                got: c.len(),
                expected: dim,
            });
        }
        Ok(Self { centroids, dim })
    }

    /// Loads a JSON codebook file (`{"centroids": [[...], ...]}`).
    pub fn load(path: &Path) -> Result<Self, CodebookError> {
        let shown = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| CodebookError::Io {
            path: shown.clone(),
            source,
        })?;
        let file: CodebookFile = serde_json::from_slice(&bytes)
            .map_err(|source| CodebookError::Parse { path: shown, source })?;
        Self::new(file.centroids)
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The `k` nearest centroids of one row. A `k` larger than the codebook returns all of them.
    pub fn nearest(&self, row: &[f32], k: usize) -> Result<Vec<Neighbor>, CodebookError> {
        if row.len() != self.dim {
            return Err(CodebookError::DimensionMismatch {
                got: row.len(),
                expected: self.dim,
            });
        }

        let mut all: Vec<Neighbor> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(centroid, c)| Neighbor {
                centroid,
                distance: squared_euclidean(row, c),
            })
            .collect();

        let k = k.min(all.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        if k < all.len() {
            all.select_nth_unstable_by(k - 1, by_distance_then_index);
            all.truncate(k);
        }
        all.sort_by(by_distance_then_index);

        Ok(all)
    }

    /// Runs `nearest` for every row of a batch.
    pub fn nearest_batch(
        &self,
        rows: &[Vec<f32>],
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, CodebookError> {
        rows.iter().map(|row| self.nearest(row, k)).collect()
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

fn by_distance_then_index(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.centroid.cmp(&b.centroid))
}
