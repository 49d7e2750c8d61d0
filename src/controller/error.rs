use crate::queue::error::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),

    #[error("task stream failed: {0:#}")]
    TaskStream(anyhow::Error),

    #[error("result handler failed: {0:#}")]
    Binding(anyhow::Error),

    #[error("checkpoint failed: {0:#}")]
    Checkpoint(anyhow::Error),

    #[error("controller task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("result stream ended before the job completed")]
    ResultsClosed,
}
