use crate::task::types::{ImageId, RowId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal record could not be encoded: {0}")]
    Encode(#[from] bincode::Error),

    #[error("image {0} is not in the store")]
    UnknownImage(ImageId),

    #[error("region {0} is not in the store")]
    UnknownRegion(RowId),

    #[error("region {0} already exists")]
    DuplicateRegion(RowId),

    #[error("journal writer lock poisoned")]
    Poisoned,
}
