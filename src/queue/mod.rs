//! Queue Service Module
//!
//! A network-addressable pair of bounded FIFO channels: one carrying tasks from the
//! controller to the workers, one carrying results back.
//!
//! ## Contract
//! - **Enqueue** blocks the caller while the target channel is full; nothing is dropped.
//! - **Dequeue** blocks the caller while the target channel is empty; order is FIFO.
//! - **Backpressure**: the capacity of each channel is the only flow control in the system.
//! - **Opaque payloads**: the service relays JSON values and never looks inside them.
//!
//! Blocking is realised with long-poll HTTP requests: the handler simply awaits the
//! bounded channel, so a slow consumer holds the producer's request open.
//!
//! ## Submodules
//! - **`channel`**: the bounded FIFO primitive.
//! - **`server`**: binds the HTTP router and owns its shutdown.
//! - **`handlers`**: axum handlers for enqueue / dequeue / status.
//! - **`client`**: the typed client used by the controller and the workers.
//! - **`protocol`**: endpoint constants and request/response bodies.

pub mod channel;
pub mod client;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod types;
