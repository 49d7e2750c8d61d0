use super::error::StoreError;
use super::types::{ImageRecord, RegionRecord};
use crate::task::types::{ImageId, Neighbor, RowId};

use std::path::Path;

/// The storage boundary seen by the job bindings.
///
/// Mutations are buffered until `flush`, which is the only durability barrier.
pub trait FeatureStore: Send + Sync {
    /// Registers a new image and returns its index.
    fn add_image(&self, file_name: &Path, class: Option<u8>) -> Result<ImageId, StoreError>;

    fn image(&self, image: ImageId) -> Result<Option<ImageRecord>, StoreError>;

    /// Images whose features have not been extracted yet, by ascending index.
    fn images_without_features(&self) -> Result<Vec<ImageRecord>, StoreError>;

    fn has_features(&self, image: ImageId) -> Result<bool, StoreError>;

    /// Highest region index in the store.
    fn last_region_index(&self) -> Option<RowId>;

    /// Appends a region and returns the offset it was stored at.
    fn append_region(&self, region: RegionRecord) -> Result<RowId, StoreError>;

    /// Back-fills the region count and first-region offset of an image.
    fn set_image_regions(
        &self,
        image: ImageId,
        count: u64,
        first: Option<RowId>,
    ) -> Result<(), StoreError>;

    /// Regions whose neighbor field is unset, by ascending index.
    fn regions_without_neighbors(&self) -> Result<Vec<RowId>, StoreError>;

    /// Descriptors of the given rows, in the same order.
    fn descriptors(&self, rows: &[RowId]) -> Result<Vec<Vec<u8>>, StoreError>;

    fn write_neighbors(&self, row: RowId, neighbors: Vec<Neighbor>) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}
