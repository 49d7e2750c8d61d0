//! Task / Result Protocol
//!
//! The closed set of messages exchanged between the controller and the worker pool.
//! The queue service relays these as opaque JSON values; only the controller and the
//! workers interpret them.
//!
//! - **`Task`**: one unit of dispatchable work, or the `Sentinel` that stops a worker.
//! - **`TaskResult`**: the outcome of exactly one task, carrying the task's correlation
//!   key back so results can be folded in any order.

pub mod types;
