//! Network Protocol Definitions
//!
//! Endpoints and bodies of the queue service HTTP API. The `{channel}` path segment is
//! either `tasks` or `results`.

use super::types::ChannelStatus;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_ENQUEUE: &str = "/queue/:channel/enqueue";
pub const ENDPOINT_DEQUEUE: &str = "/queue/:channel/dequeue";
pub const ENDPOINT_STATUS: &str = "/queue/status";

/// Header carrying the shared secret on every request.
pub const SECRET_HEADER: &str = "x-queue-secret";

pub fn enqueue_path(channel: &str) -> String {
    format!("/queue/{}/enqueue", channel)
}

pub fn dequeue_path(channel: &str) -> String {
    format!("/queue/{}/dequeue", channel)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub item: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DequeueResponse {
    pub item: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub tasks: ChannelStatus,
    pub results: ChannelStatus,
}
