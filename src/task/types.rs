use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of an image record in the feature store.
pub type ImageId = u64;

/// Identifier of a region (descriptor row) in the feature store.
pub type RowId = u64;

/// A unit of work sent from the controller to exactly one worker.
///
/// Ownership moves from the controller to whichever worker dequeues it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Extract local features from one image.
    Extract {
        /// Path of the image, as seen by the worker.
        image: PathBuf,
        /// Correlation key returned untouched in the result.
        key: ImageId,
    },
    /// Find the nearest codebook centroids for a batch of descriptor rows.
    Neighbor {
        vectors: Vec<Vec<f32>>,
        /// Row identifiers, aligned with `vectors`.
        rows: Vec<RowId>,
    },
    /// No more work: acknowledge and exit.
    Sentinel,
}

impl Task {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Task::Sentinel)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Extract { .. } => "extract",
            Task::Neighbor { .. } => "neighbor",
            Task::Sentinel => "sentinel",
        }
    }
}

/// One detected region with its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRegion {
    /// Center (x, y) in pixels.
    pub center: [i64; 2],
    pub radius: i64,
    /// Corner strength reported by the detector.
    pub cornerness: f64,
    pub descriptor: Vec<u8>,
}

/// A centroid reference together with its squared Euclidean distance to the query row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    pub centroid: usize,
    pub distance: f64,
}

/// A per-task handler failure.
///
/// Workers encode failures into the result instead of crashing, so the controller
/// can tell "this input failed" apart from "the worker died".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub reason: String,
}

impl TaskFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// The outcome of processing one task, sent from a worker back to the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Extract {
        key: ImageId,
        outcome: Result<Vec<ExtractedRegion>, TaskFailure>,
    },
    Neighbor {
        rows: Vec<RowId>,
        /// One neighbor list per row, ascending by distance.
        outcome: Result<Vec<Vec<Neighbor>>, TaskFailure>,
    },
    /// Reply to a `Sentinel`.
    Done { worker: usize },
}

impl TaskResult {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskResult::Done { .. })
    }

    /// Returns the failure if the handler did not succeed.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskResult::Extract {
                outcome: Err(failure),
                ..
            }
            | TaskResult::Neighbor {
                outcome: Err(failure),
                ..
            } => Some(failure),
            _ => None,
        }
    }
}
