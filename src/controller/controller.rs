use super::binding::{JobBinding, TaskStream};
use super::error::ControllerError;
use super::types::*;
use crate::queue::client::QueueClient;
use crate::queue::error::QueueError;
use crate::task::types::{Task, TaskResult};

use std::future::Future;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the producer has done so far, published to the drain loop.
#[derive(Debug, Default, Clone, Copy)]
struct Production {
    emitted: u64,
    exhausted: bool,
}

/// Drives jobs against the pool attached to one queue service.
pub struct Controller {
    client: QueueClient,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(client: QueueClient, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Runs one job to completion.
    ///
    /// Returns `NothingToDo` when the stream yielded no tasks. Framework failures abort the
    /// job; whatever the last checkpoint persisted is kept.
    pub async fn run<B: JobBinding>(&self, binding: &mut B) -> Result<JobOutcome, ControllerError> {
        let id = JobId::new();
        let started = Instant::now();

        let stream = binding.task_stream().map_err(ControllerError::TaskStream)?;
        let mut state = JobState::new(stream.total());
        let expected_acks = if self.config.release_workers {
            self.config.pool_size
        } else {
            0
        };

        tracing::info!(
            "Job {} ({}) starting: up to {} tasks, {} workers",
            binding.name(),
            id.0,
            state.tasks_total,
            self.config.pool_size
        );

        let (progress_tx, mut progress) = watch::channel(Production::default());
        let mut producer = tokio::spawn(produce(
            self.client.clone(),
            stream,
            progress_tx,
            expected_acks,
        ));

        let drained = self
            .drain(binding, &mut state, &mut progress, &mut producer, expected_acks)
            .await;

        if let Err(e) = drained {
            producer.abort();
            tracing::error!("Job {} ({}) aborted: {}", binding.name(), id.0, e);
            return Err(e);
        }
        producer.await??;

        binding.checkpoint().map_err(ControllerError::Checkpoint)?;
        state.record_checkpoint();

        let summary = JobSummary {
            job: binding.name().to_string(),
            id,
            tasks: state.tasks_completed,
            failures: state.failures,
            checkpoints: state.checkpoints,
            acknowledgments: state.acknowledgments,
            elapsed: started.elapsed(),
        };

        if state.tasks_emitted == 0 {
            tracing::info!("Job {} had nothing to do", summary.job);
            Ok(JobOutcome::NothingToDo(summary))
        } else {
            tracing::info!(
                "Job {} completed: {} tasks ({} failed), {} checkpoints in {:.1?}",
                summary.job,
                summary.tasks,
                summary.failures,
                summary.checkpoints,
                summary.elapsed
            );
            Ok(JobOutcome::Completed(summary))
        }
    }

    /// Sends one sentinel per worker and waits for every acknowledgment, without a job.
    ///
    /// Used when a job finds nothing to do but the pool is already running.
    pub async fn release_workers(&self) -> Result<usize, ControllerError> {
        let workers = self.config.pool_size;
        tracing::info!("Releasing {} workers", workers);

        let send = async {
            for _ in 0..workers {
                self.client.push_task(&Task::Sentinel).await?;
            }
            Ok::<_, QueueError>(())
        };
        let collect = async {
            let mut acks = 0;
            while acks < workers {
                match self.client.pull_result().await? {
                    TaskResult::Done { worker } => {
                        acks += 1;
                        tracing::debug!("Worker {} released ({}/{})", worker, acks, workers);
                    }
                    other => tracing::warn!("Discarding stray result {:?}", other),
                }
            }
            Ok::<_, QueueError>(acks)
        };

        let ((), acks) = tokio::try_join!(send, collect)?;
        Ok(acks)
    }

    /// Folds results until the job is complete.
    ///
    /// A dequeue is only in flight while a result is owed, and it is never dropped before
    /// it returns, so no result is lost and none is left pending for the next job.
    async fn drain<B: JobBinding>(
        &self,
        binding: &mut B,
        state: &mut JobState,
        progress: &mut watch::Receiver<Production>,
        producer: &mut JoinHandle<Result<(), ControllerError>>,
        expected_acks: usize,
    ) -> Result<(), ControllerError> {
        let mut pull = None;

        while !state.is_complete(expected_acks) {
            state.tasks_emitted = progress.borrow().emitted;
            if pull.is_none() && outstanding(state, expected_acks) > 0 {
                pull = Some(Box::pin(self.client.pull_result()));
            }

            tokio::select! {
                received = in_flight(&mut pull) => {
                    pull = None;
                    state.tasks_emitted = progress.borrow().emitted;
                    self.fold(binding, state, received?, expected_acks)?;
                }
                changed = progress.changed(), if !state.stream_exhausted => {
                    let production = *progress.borrow_and_update();
                    if changed.is_err() && !production.exhausted {
                        // The producer stopped before the end of the stream.
                        return Err(match producer.await {
                            Ok(Err(e)) => e,
                            Ok(Ok(())) => ControllerError::ResultsClosed,
                            Err(join) => join.into(),
                        });
                    }
                    state.tasks_emitted = production.emitted;
                    if production.exhausted {
                        state.stream_exhausted = true;
                        tracing::info!(
                            "Job {}: task stream exhausted after {} tasks",
                            binding.name(),
                            production.emitted
                        );
                        if state.pending_checkpoint > 0 {
                            binding.checkpoint().map_err(ControllerError::Checkpoint)?;
                            state.record_checkpoint();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fold<B: JobBinding>(
        &self,
        binding: &mut B,
        state: &mut JobState,
        result: TaskResult,
        expected_acks: usize,
    ) -> Result<(), ControllerError> {
        if let TaskResult::Done { worker } = result {
            state.acknowledgments += 1;
            if state.acknowledgments > expected_acks {
                tracing::warn!("Unexpected acknowledgment from worker {}", worker);
            } else {
                tracing::debug!(
                    "Worker {} acknowledged ({}/{})",
                    worker,
                    state.acknowledgments,
                    expected_acks
                );
            }
            return Ok(());
        }

        state.tasks_completed += 1;
        state.pending_checkpoint += 1;
        debug_assert!(state.tasks_completed <= state.tasks_emitted);

        if result.failure().is_some() {
            state.failures += 1;
        }

        let checkpoint = state.pending_checkpoint >= self.config.checkpoint_every.max(1) as u64;
        binding
            .handle_result(result, checkpoint)
            .map_err(ControllerError::Binding)?;
        if checkpoint {
            state.record_checkpoint();
            tracing::debug!(
                "Job {}: checkpoint at {} results",
                binding.name(),
                state.tasks_completed
            );
        }

        let every = self.config.progress_every as u64;
        if every > 0 && state.tasks_completed % every == 0 {
            tracing::info!(
                "Job {}: {}/{} tasks done",
                binding.name(),
                state.tasks_completed,
                state.tasks_total
            );
        }

        Ok(())
    }
}

/// Results still owed to the controller: one per emitted task, plus one acknowledgment
/// per worker once the sentinels are out.
fn outstanding(state: &JobState, expected_acks: usize) -> u64 {
    let results = state.tasks_emitted.saturating_sub(state.tasks_completed);
    let acks = if state.stream_exhausted {
        expected_acks.saturating_sub(state.acknowledgments) as u64
    } else {
        0
    };
    results + acks
}

/// Awaits the dequeue in `slot`, or never resolves when there is none.
async fn in_flight<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(pull) => pull.await,
        None => std::future::pending().await,
    }
}

/// Enqueues every task of the stream, then the sentinels.
///
/// A task counts as emitted before its enqueue starts, so a result can never be seen
/// ahead of its task.
async fn produce(
    client: QueueClient,
    stream: TaskStream,
    progress: watch::Sender<Production>,
    sentinels: usize,
) -> Result<(), ControllerError> {
    for task in stream.into_tasks() {
        let task = task.map_err(ControllerError::TaskStream)?;
        progress.send_modify(|production| production.emitted += 1);
        client.push_task(&task).await?;
    }

    progress.send_modify(|production| production.exhausted = true);

    for _ in 0..sentinels {
        client.push_task(&Task::Sentinel).await?;
    }
    Ok(())
}
