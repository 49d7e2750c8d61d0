use super::codebook::Codebook;
use super::extract::FeatureExtractor;
use crate::queue::client::QueueClient;
use crate::queue::error::QueueError;
use crate::task::types::{Neighbor, RowId, Task, TaskFailure, TaskResult};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Counters reported when a worker exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub failed: u64,
}

/// One worker of the pool.
///
/// Stateless across tasks apart from the codebook, loaded once and never mutated,
/// and a scratch directory private to this worker.
pub struct Worker<E> {
    id: usize,
    client: QueueClient,
    extractor: E,
    codebook: Option<Arc<Codebook>>,
    neighbors: usize,
    scratch: PathBuf,
}

impl<E: FeatureExtractor> Worker<E> {
    /// `id` namespaces the scratch directory under `scratch_root`.
    pub fn new(
        id: usize,
        client: QueueClient,
        extractor: E,
        codebook: Option<Arc<Codebook>>,
        neighbors: usize,
        scratch_root: &Path,
    ) -> Self {
        Self {
            id,
            client,
            extractor,
            codebook,
            neighbors,
            scratch: scratch_root.join(format!("worker-{}", id)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Pulls and processes tasks until a sentinel arrives.
    ///
    /// Only queue failures end the loop early; handler failures travel inside results.
    /// The scratch directory is removed however the loop ends.
    pub async fn run(&self) -> Result<WorkerReport, QueueError> {
        if let Err(e) = tokio::fs::create_dir_all(&self.scratch).await {
            tracing::warn!(
                "Worker {} could not create scratch dir {}: {}",
                self.id,
                self.scratch.display(),
                e
            );
        }
        tracing::info!("Worker {} started", self.id);

        let outcome = self.serve_tasks().await;

        if let Err(e) = tokio::fs::remove_dir_all(&self.scratch).await {
            tracing::debug!("Worker {} scratch cleanup: {}", self.id, e);
        }

        match &outcome {
            Ok(report) => tracing::info!(
                "Worker {} exiting after {} tasks ({} failed)",
                self.id,
                report.processed,
                report.failed
            ),
            Err(e) => tracing::error!("Worker {} lost the queue: {}", self.id, e),
        }
        outcome
    }

    async fn serve_tasks(&self) -> Result<WorkerReport, QueueError> {
        let mut report = WorkerReport::default();
        loop {
            let task = self.client.pull_task().await?;
            let stop = task.is_sentinel();
            let kind = task.kind();

            let result = self.handle(task).await;
            if !stop {
                report.processed += 1;
                if let Some(failure) = result.failure() {
                    report.failed += 1;
                    tracing::warn!("Worker {} {} task failed: {}", self.id, kind, failure);
                } else {
                    tracing::debug!("Worker {} finished {} task", self.id, kind);
                }
            }

            self.client.push_result(&result).await?;

            if stop {
                return Ok(report);
            }
        }
    }

    /// Runs the handler matching the task and wraps its outcome into a result.
    pub async fn handle(&self, task: Task) -> TaskResult {
        match task {
            Task::Sentinel => TaskResult::Done { worker: self.id },
            Task::Extract { image, key } => {
                let outcome = self
                    .extractor
                    .extract(&image, &self.scratch)
                    .await
                    .map_err(|e| TaskFailure::new(format!("{}: {}", image.display(), e)));
                TaskResult::Extract { key, outcome }
            }
            Task::Neighbor { vectors, rows } => {
                let outcome = self.search(vectors, &rows).await;
                TaskResult::Neighbor { rows, outcome }
            }
        }
    }

    async fn search(
        &self,
        vectors: Vec<Vec<f32>>,
        rows: &[RowId],
    ) -> Result<Vec<Vec<Neighbor>>, TaskFailure> {
        let Some(codebook) = self.codebook.clone() else {
            return Err(TaskFailure::new("uninitialized codebook"));
        };
        if vectors.len() != rows.len() {
            return Err(TaskFailure::new(format!(
                "batch has {} vectors for {} rows",
                vectors.len(),
                rows.len()
            )));
        }

        let k = self.neighbors;
        tokio::task::spawn_blocking(move || codebook.nearest_batch(&vectors, k))
            .await
            .map_err(|e| TaskFailure::new(format!("neighbor search aborted: {}", e)))?
            .map_err(|e| TaskFailure::new(e.to_string()))
    }
}
