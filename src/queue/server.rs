//! Queue Service Process
//!
//! Binds the HTTP router on a TCP listener and keeps it serving until the owner asks
//! for shutdown. The advertised address (host, bound port, secret) is what workers use
//! to find the service.

use super::handlers::{QueueState, handle_dequeue, handle_enqueue, handle_status};
use super::protocol::{ENDPOINT_DEQUEUE, ENDPOINT_ENQUEUE, ENDPOINT_STATUS};
use super::types::QueueAddress;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long a shutdown waits for open long-poll requests before cutting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct QueueServer {
    state: Arc<QueueState>,
}

impl QueueServer {
    /// Creates a service whose channels hold at most `capacity` items each.
    pub fn new(capacity: usize, secret: impl Into<String>) -> Self {
        Self {
            state: QueueState::new(capacity, secret),
        }
    }

    pub fn state(&self) -> Arc<QueueState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_ENQUEUE, post(handle_enqueue))
            .route(ENDPOINT_DEQUEUE, post(handle_dequeue))
            .route(ENDPOINT_STATUS, get(handle_status))
            .layer(Extension(self.state.clone()))
    }

    /// Binds `bind_host:port` (port 0 picks a free one) and starts serving in the background.
    ///
    /// `advertise_host` is the host written into the returned address; it defaults to
    /// the bind host.
    pub async fn bind(
        self,
        bind_host: &str,
        port: u16,
        advertise_host: Option<&str>,
        secret: &str,
    ) -> Result<QueueServerHandle> {
        let listener = tokio::net::TcpListener::bind((bind_host, port))
            .await
            .with_context(|| format!("binding queue service on {}:{}", bind_host, port))?;
        let local = listener.local_addr()?;

        let address = QueueAddress::new(
            advertise_host.unwrap_or(bind_host),
            local.port(),
            secret,
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(
            "Queue service listening on {} (advertised as {}:{})",
            local,
            address.host,
            address.port
        );

        Ok(QueueServerHandle {
            address,
            state: self.state,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Owner's handle on a running queue service.
pub struct QueueServerHandle {
    address: QueueAddress,
    state: Arc<QueueState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl QueueServerHandle {
    pub fn address(&self) -> &QueueAddress {
        &self.address
    }

    pub fn state(&self) -> &Arc<QueueState> {
        &self.state
    }

    /// Serves until the process receives Ctrl+C, then shuts down.
    pub async fn serve_until_interrupted(self) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        tracing::info!("Interrupted, closing queue service");
        self.shutdown().await
    }

    /// Stops accepting requests and tears the service down.
    ///
    /// Blocked long-poll requests are answered with 503 first; whatever is still open
    /// after a short grace period is aborted.
    pub async fn shutdown(mut self) -> Result<()> {
        self.state.close();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(result)) => result.context("queue service terminated with an error")?,
            Ok(Err(join_err)) if join_err.is_cancelled() => {}
            Ok(Err(join_err)) => return Err(anyhow::anyhow!(join_err)),
            Err(_) => {
                tracing::warn!("Queue service still has open requests, aborting them");
                self.task.abort();
            }
        }

        tracing::info!("Queue service on port {} closed", self.address.port);
        Ok(())
    }
}
