//! Feature Storage Module
//!
//! The persisted side of the pipeline: images waiting for feature extraction, the
//! regions and descriptors extracted from them, and the neighbor lists computed for
//! each region.
//!
//! ## Core Concepts
//! - **Predicates**: "needs extraction" is an image without a region count; "needs
//!   neighbors" is a region without a neighbor list. Job task streams are derived from
//!   these, which makes re-running a job after a crash pick up exactly the unfinished part.
//! - **Journal**: every mutation is appended to a buffered journal; `flush` is the
//!   durability barrier that makes everything before it survive a crash.
//! - **Single writer**: only the controller side mutates the store; workers never see it.

pub mod error;
pub mod journal;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
