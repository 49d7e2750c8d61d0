//! Job Controller Module
//!
//! Drives exactly one batch job against the worker pool.
//!
//! ## Lifecycle
//! 1. **Produce**: a background task walks the binding's lazy task stream and enqueues
//!    each task; a full task channel throttles it.
//! 2. **Drain**: concurrently, results are dequeued and folded into the binding, with a
//!    checkpoint every `checkpoint_every` results and one when the stream runs dry.
//! 3. **Release**: after the stream is exhausted, one sentinel per worker is enqueued and
//!    draining continues until every worker has acknowledged.
//! 4. **Final checkpoint**: always, unconditionally.
//!
//! Producing and draining never wait on each other, so a full result channel cannot
//! deadlock a producer blocked on a full task channel.
//!
//! ## Submodules
//! - **`binding`**: the capability interface a job implements (`task_stream`, `handle_result`).
//! - **`controller`**: the produce / drain / release algorithm.
//! - **`pool`**: the explicit handle owning the queue service and the worker members.
//! - **`types`**: configuration, job state and outcomes.

pub mod binding;
pub mod controller;
pub mod error;
pub mod pool;
pub mod types;
