use super::channel::BoundedChannel;
use super::protocol::*;
use super::types::Channel;

use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json, extract::Path};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared state behind the router: the two channels and the secret guarding them.
pub struct QueueState {
    pub tasks: BoundedChannel<serde_json::Value>,
    pub results: BoundedChannel<serde_json::Value>,
    secret: String,
    closed: watch::Sender<bool>,
}

impl QueueState {
    pub fn new(capacity: usize, secret: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            tasks: BoundedChannel::new(Channel::Tasks, capacity),
            results: BoundedChannel::new(Channel::Results, capacity),
            secret: secret.into(),
            closed: watch::Sender::new(false),
        })
    }

    /// Releases every blocked request with 503 and refuses new ones.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn channel(&self, channel: Channel) -> &BoundedChannel<serde_json::Value> {
        match channel {
            Channel::Tasks => &self.tasks,
            Channel::Results => &self.results,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == self.secret)
    }
}

/// Long-poll enqueue: responds only once the item is in the channel.
pub async fn handle_enqueue(
    Extension(state): Extension<Arc<QueueState>>,
    Path(channel): Path<Channel>,
    headers: HeaderMap,
    Json(req): Json<EnqueueRequest>,
) -> StatusCode {
    if !state.authorized(&headers) {
        tracing::warn!("Rejected enqueue on {} with a bad secret", channel);
        return StatusCode::UNAUTHORIZED;
    }

    if state.is_closed() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    tokio::select! {
        pushed = state.channel(channel).push(req.item) => match pushed {
            Ok(()) => {
                tracing::trace!("Enqueued item on {}", channel);
                StatusCode::OK
            }
            Err(e) => {
                tracing::error!("Enqueue failed: {}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
        _ = state.wait_closed() => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Long-poll dequeue: responds once an item is available.
pub async fn handle_dequeue(
    Extension(state): Extension<Arc<QueueState>>,
    Path(channel): Path<Channel>,
    headers: HeaderMap,
) -> Result<Json<DequeueResponse>, StatusCode> {
    if !state.authorized(&headers) {
        tracing::warn!("Rejected dequeue on {} with a bad secret", channel);
        return Err(StatusCode::UNAUTHORIZED);
    }

    if state.is_closed() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    tokio::select! {
        popped = state.channel(channel).pop() => match popped {
            Some(item) => {
                tracing::trace!("Dequeued item from {}", channel);
                Ok(Json(DequeueResponse { item }))
            }
            None => Err(StatusCode::SERVICE_UNAVAILABLE),
        },
        _ = state.wait_closed() => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

pub async fn handle_status(
    Extension(state): Extension<Arc<QueueState>>,
    headers: HeaderMap,
) -> Result<Json<QueueStatusResponse>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(Json(QueueStatusResponse {
        tasks: state.tasks.status(),
        results: state.results.status(),
    }))
}
