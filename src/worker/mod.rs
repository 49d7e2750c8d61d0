//! Worker Runtime Module
//!
//! A worker is a single-threaded request/compute/reply loop against the queue service:
//! pull one task, run the matching handler, push one result, repeat until a sentinel
//! arrives. Throughput comes from running many workers, one per OS process.
//!
//! ## Submodules
//! - **`runtime`**: the loop itself and the per-worker scratch directory.
//! - **`extract`**: the feature-extraction handler wrapping the external descriptor binary.
//! - **`codebook`**: the fixed centroid set and the K-nearest-neighbor search over it.

pub mod codebook;
pub mod extract;
pub mod runtime;
