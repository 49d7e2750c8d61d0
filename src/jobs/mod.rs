//! Job Bindings
//!
//! The two workloads the controller drives. Each binding derives its tasks from what the
//! store still lacks, so re-running a job after a crash or a full run is always safe.
//!
//! - **`extraction`**: one task per image without features; results become regions.
//! - **`neighbors`**: one task per batch of regions without neighbors; results are the
//!   K nearest codebook centroids of every row.

pub mod extraction;
pub mod neighbors;

#[cfg(test)]
mod tests;
