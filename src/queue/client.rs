//! Queue Service Client
//!
//! Used by the controller and by every worker. Each call maps onto one long-poll
//! request; the call returns when the service has accepted (enqueue) or delivered
//! (dequeue) an item.

use super::error::QueueError;
use super::protocol::*;
use super::types::{Channel, QueueAddress};
use crate::task::types::{Task, TaskResult};

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Clone)]
pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl QueueClient {
    /// Builds a client without contacting the service.
    pub fn new(address: &QueueAddress) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: address.base_url(),
            secret: address.secret.clone(),
        }
    }

    /// Builds a client and checks that the service is reachable and accepts the secret.
    ///
    /// Transient connection errors are retried with jittered exponential backoff, since a
    /// worker may start a moment before the service listens. A rejected secret is not
    /// retried.
    pub async fn connect(address: &QueueAddress, attempts: usize) -> Result<Self, QueueError> {
        let client = Self::new(address);
        let attempts = attempts.max(1);
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            match client.status().await {
                Ok(status) => {
                    tracing::debug!(
                        "Connected to queue service at {} (tasks {}/{}, results {}/{})",
                        client.base_url,
                        status.tasks.len,
                        status.tasks.capacity,
                        status.results.len,
                        status.results.capacity
                    );
                    return Ok(client);
                }
                Err(QueueError::Connection { .. }) if attempt + 1 < attempts => {
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(2000);
                }
                Err(e) => return Err(e),
            }
        }

        Err(QueueError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> Result<QueueStatusResponse, QueueError> {
        let url = format!("{}{}", self.base_url, ENDPOINT_STATUS);
        let response = self
            .http
            .get(&url)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .map_err(|source| QueueError::Connection { url, source })?;

        let response = Self::check(response, None)?;
        let body = response
            .bytes()
            .await
            .map_err(|source| QueueError::Connection {
                url: self.base_url.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Puts one item on `channel`, waiting while the channel is full.
    pub async fn enqueue<T: Serialize>(&self, channel: Channel, item: &T) -> Result<(), QueueError> {
        let payload = EnqueueRequest {
            item: serde_json::to_value(item)?,
        };
        let url = format!("{}{}", self.base_url, enqueue_path(channel.as_str()));

        let response = self
            .http
            .post(&url)
            .header(SECRET_HEADER, &self.secret)
            .json(&payload)
            .send()
            .await
            .map_err(|source| QueueError::Connection { url, source })?;

        Self::check(response, Some(channel))?;
        Ok(())
    }

    /// Takes the oldest item from `channel`, waiting while the channel is empty.
    pub async fn dequeue<T: DeserializeOwned>(&self, channel: Channel) -> Result<T, QueueError> {
        let url = format!("{}{}", self.base_url, dequeue_path(channel.as_str()));

        let response = self
            .http
            .post(&url)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .map_err(|source| QueueError::Connection {
                url: url.clone(),
                source,
            })?;

        let response = Self::check(response, Some(channel))?;
        let body = response
            .bytes()
            .await
            .map_err(|source| QueueError::Connection { url, source })?;
        let envelope: DequeueResponse = serde_json::from_slice(&body)?;
        Ok(serde_json::from_value(envelope.item)?)
    }

    pub async fn push_task(&self, task: &Task) -> Result<(), QueueError> {
        self.enqueue(Channel::Tasks, task).await
    }

    pub async fn pull_task(&self) -> Result<Task, QueueError> {
        self.dequeue(Channel::Tasks).await
    }

    pub async fn push_result(&self, result: &TaskResult) -> Result<(), QueueError> {
        self.enqueue(Channel::Results, result).await
    }

    pub async fn pull_result(&self) -> Result<TaskResult, QueueError> {
        self.dequeue(Channel::Results).await
    }

    fn check(
        response: reqwest::Response,
        channel: Option<Channel>,
    ) -> Result<reqwest::Response, QueueError> {
        match (response.status(), channel) {
            (status, _) if status.is_success() => Ok(response),
            (StatusCode::UNAUTHORIZED, _) => Err(QueueError::Unauthorized),
            (StatusCode::SERVICE_UNAVAILABLE, Some(channel)) => Err(QueueError::Closed(channel)),
            (status, _) => Err(QueueError::Status { status }),
        }
    }
}
