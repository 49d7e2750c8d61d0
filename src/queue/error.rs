use super::types::Channel;
use thiserror::Error;

/// Failures talking to the queue service.
///
/// All of them are fatal to the calling process: there is no reconnection.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue service unreachable at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("queue service rejected the shared secret")]
    Unauthorized,

    #[error("the {0} channel is closed")]
    Closed(Channel),

    #[error("unexpected status {status} from queue service")]
    Status { status: reqwest::StatusCode },

    #[error("malformed queue payload: {0}")]
    Payload(#[from] serde_json::Error),
}
