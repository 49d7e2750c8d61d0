use crate::task::types::{ImageId, Neighbor, RowId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An image registered for processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub index: ImageId,
    /// Path relative to the configured image root.
    pub file_name: PathBuf,
    /// Class label of the website the image came from, if known.
    pub class: Option<u8>,
    /// Index of the first region, set when the image has at least one region.
    pub reg_first: Option<RowId>,
    /// Number of regions; `None` until features have been extracted.
    pub reg_count: Option<u64>,
}

impl ImageRecord {
    pub fn has_features(&self) -> bool {
        self.reg_count.is_some()
    }
}

/// One local region of an image together with its descriptor.
///
/// Regions of the same image have consecutive indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionRecord {
    pub index: RowId,
    pub image: ImageId,
    pub class: Option<u8>,
    pub center: [i64; 2],
    pub radius: i64,
    pub cornerness: f64,
    pub descriptor: Vec<u8>,
    /// Nearest codebook centroids, ascending by distance; `None` until computed.
    pub neighbors: Option<Vec<Neighbor>>,
}

/// A single mutation as written to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalEntry {
    Image(ImageRecord),
    ImageRegions {
        image: ImageId,
        count: u64,
        first: Option<RowId>,
    },
    Region(RegionRecord),
    Neighbors {
        row: RowId,
        neighbors: Vec<Neighbor>,
    },
}
