use crate::controller::binding::{JobBinding, TaskStream};
use crate::storage::store::FeatureStore;
use crate::task::types::{RowId, Task, TaskResult};

use anyhow::{Context, Result, bail};
use std::sync::Arc;

/// Assigns the nearest codebook centroids to every region that has none yet.
pub struct NeighborSearchJob<S> {
    store: Arc<S>,
    batch_size: usize,
    written: u64,
    failed_batches: u64,
}

impl<S: FeatureStore + 'static> NeighborSearchJob<S> {
    pub fn new(store: Arc<S>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            written: 0,
            failed_batches: 0,
        }
    }

    /// Rows still waiting for neighbors. Zero means there is no reason to start a pool.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.store.regions_without_neighbors()?.len())
    }

    /// Rows whose neighbors were written by this job.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches
    }
}

impl<S: FeatureStore + 'static> JobBinding for NeighborSearchJob<S> {
    fn name(&self) -> &str {
        "neighbor-search"
    }

    /// One task per `batch_size` pending rows; the last batch may be smaller.
    ///
    /// Descriptors are read from the store only when the producer reaches a batch.
    fn task_stream(&mut self) -> Result<TaskStream> {
        let pending = self.store.regions_without_neighbors()?;
        let total = pending.len().div_ceil(self.batch_size);
        let batches: Vec<Vec<RowId>> = pending
            .chunks(self.batch_size)
            .map(<[RowId]>::to_vec)
            .collect();

        let store = self.store.clone();
        let tasks = batches.into_iter().map(move |rows| {
            let vectors = store
                .descriptors(&rows)
                .with_context(|| format!("reading descriptors of {} rows", rows.len()))?
                .into_iter()
                .map(|descriptor| descriptor.into_iter().map(f32::from).collect())
                .collect();
            Ok(Task::Neighbor { vectors, rows })
        });
        Ok(TaskStream::new(total, tasks))
    }

    fn handle_result(&mut self, result: TaskResult, checkpoint: bool) -> Result<()> {
        match result {
            TaskResult::Neighbor {
                rows,
                outcome: Ok(lists),
            } => {
                if rows.len() != lists.len() {
                    bail!(
                        "neighbor result has {} lists for {} rows",
                        lists.len(),
                        rows.len()
                    );
                }
                for (row, neighbors) in rows.into_iter().zip(lists) {
                    self.store.write_neighbors(row, neighbors)?;
                    self.written += 1;
                }
            }
            TaskResult::Neighbor {
                rows,
                outcome: Err(failure),
            } => {
                self.failed_batches += 1;
                tracing::warn!(
                    "Neighbor search failed for {} rows starting at {:?}: {}",
                    rows.len(),
                    rows.first(),
                    failure
                );
            }
            other => bail!("neighbor search received an unexpected result: {:?}", other),
        }

        if checkpoint {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.store.flush().context("flushing feature store")
    }
}
