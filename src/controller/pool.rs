//! Worker Pool Lifecycle
//!
//! The pool is an explicit handle: it owns the running queue service and every worker
//! attached to it. Callers start it, may grow it between jobs, and finalize it once.

use crate::config::QueueSettings;
use crate::queue::server::{QueueServer, QueueServerHandle};
use crate::queue::types::QueueAddress;

use anyhow::{Context, Result};
use std::future::Future;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// One worker attached to the pool.
pub enum PoolMember {
    /// A separate OS process running the `worker` subcommand.
    Process { index: usize, child: Child },
    /// A worker loop running on this runtime.
    Local {
        index: usize,
        handle: JoinHandle<Result<()>>,
    },
}

impl PoolMember {
    pub fn index(&self) -> usize {
        match self {
            PoolMember::Process { index, .. } | PoolMember::Local { index, .. } => *index,
        }
    }

    /// Waits for the member to exit; returns whether it exited cleanly.
    async fn wait(self) -> bool {
        match self {
            PoolMember::Process { index, mut child } => match child.wait().await {
                Ok(status) if status.success() => true,
                Ok(status) => {
                    tracing::warn!("Worker process {} exited with {}", index, status);
                    false
                }
                Err(e) => {
                    tracing::warn!("Waiting for worker process {} failed: {}", index, e);
                    false
                }
            },
            PoolMember::Local { index, handle } => match handle.await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!("Worker {} failed: {:#}", index, e);
                    false
                }
                Err(e) => {
                    tracing::warn!("Worker {} panicked: {}", index, e);
                    false
                }
            },
        }
    }

    async fn kill(self) {
        match self {
            PoolMember::Process { index, mut child } => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Killing worker process {} failed: {}", index, e);
                }
            }
            PoolMember::Local { handle, .. } => handle.abort(),
        }
    }
}

/// Exit statistics of a finalized pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub exited: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct WorkerPool {
    members: Vec<PoolMember>,
    next_index: usize,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.members.iter().map(PoolMember::index).collect()
    }

    /// Starts `count` worker processes. `command` builds the command for a given index;
    /// indices keep increasing across calls.
    pub fn spawn_processes<F>(&mut self, count: usize, mut command: F) -> Result<Vec<usize>>
    where
        F: FnMut(usize) -> Command,
    {
        let mut started = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.next_index;
            let child = command(index)
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawning worker process {}", index))?;
            tracing::debug!("Worker process {} started (pid {:?})", index, child.id());
            self.members.push(PoolMember::Process { index, child });
            self.next_index += 1;
            started.push(index);
        }
        Ok(started)
    }

    /// Starts `count` workers as tasks on the current runtime.
    pub fn spawn_tasks<F, Fut>(&mut self, count: usize, mut start: F) -> Vec<usize>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut started = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.next_index;
            let handle = tokio::spawn(start(index));
            self.members.push(PoolMember::Local { index, handle });
            self.next_index += 1;
            started.push(index);
        }
        started
    }

    /// Waits for every member to exit.
    pub async fn wait(self) -> PoolReport {
        let mut report = PoolReport::default();
        for member in self.members {
            if member.wait().await {
                report.exited += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    pub async fn kill(self) {
        for member in self.members {
            member.kill().await;
        }
    }
}

/// The running queue service plus the workers attached to it.
pub struct PoolHandle {
    server: QueueServerHandle,
    workers: WorkerPool,
}

impl PoolHandle {
    pub fn new(server: QueueServerHandle) -> Self {
        Self {
            server,
            workers: WorkerPool::new(),
        }
    }

    /// Binds the queue service and publishes its address for worker processes.
    pub async fn start(settings: &QueueSettings) -> Result<Self> {
        let server = QueueServer::new(settings.capacity, settings.secret.clone())
            .bind(
                &settings.host,
                settings.port,
                settings.advertise_host.as_deref(),
                &settings.secret,
            )
            .await?;
        server
            .address()
            .write_to(&settings.address_file)
            .with_context(|| {
                format!(
                    "publishing queue address to {}",
                    settings.address_file.display()
                )
            })?;
        Ok(Self::new(server))
    }

    pub fn address(&self) -> &QueueAddress {
        self.server.address()
    }

    /// Number of workers currently attached.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Adds worker processes between jobs.
    pub fn grow_processes<F>(&mut self, count: usize, command: F) -> Result<Vec<usize>>
    where
        F: FnMut(usize) -> Command,
    {
        let started = self.workers.spawn_processes(count, command)?;
        tracing::info!("Pool grown by {} to {} workers", count, self.size());
        Ok(started)
    }

    /// Adds in-process workers between jobs.
    pub fn grow_tasks<F, Fut>(&mut self, count: usize, start: F) -> Vec<usize>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let started = self.workers.spawn_tasks(count, start);
        tracing::info!("Pool grown by {} to {} workers", count, self.size());
        started
    }

    /// Waits for every worker to exit, then closes the queue service.
    ///
    /// Workers only exit after a sentinel, so a job with `release_workers` (or
    /// `Controller::release_workers`) must have run first.
    pub async fn finalize(self) -> Result<PoolReport> {
        let report = self.workers.wait().await;
        tracing::info!(
            "Pool finalized: {} workers exited, {} failed",
            report.exited,
            report.failed
        );
        self.server.shutdown().await?;
        Ok(report)
    }

    /// Kills every worker and closes the queue service, after a failed job.
    pub async fn abort(self) -> Result<()> {
        tracing::warn!("Aborting pool of {} workers", self.workers.len());
        self.workers.kill().await;
        self.server.shutdown().await
    }
}
