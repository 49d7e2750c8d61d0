//! Distributed Feature Pipeline Library
//!
//! Core of a batch pipeline that turns website images into local features and codebook
//! assignments. A queue service relays tasks and results between one controller and a
//! pool of worker processes.
//!
//! ## Architecture Modules
//! - **`queue`**: The queue service. Two bounded FIFO channels (tasks, results) served
//!   over HTTP with long-poll enqueue/dequeue and a shared secret, plus its client.
//! - **`task`**: The task and result wire types exchanged through the queue.
//! - **`worker`**: The worker loop and its two handlers: an external feature extractor
//!   and nearest-centroid search against a fixed codebook.
//! - **`controller`**: Drives one job over the pool: produces tasks lazily, folds results,
//!   checkpoints, and releases the workers with sentinels. Also owns the pool handle.
//! - **`jobs`**: The feature-extraction and neighbor-search job bindings.
//! - **`storage`**: The feature store boundary and its journaled implementation.
//! - **`config`**: The TOML configuration shared by every subcommand.

pub mod config;
pub mod controller;
pub mod jobs;
pub mod queue;
pub mod storage;
pub mod task;
pub mod worker;
