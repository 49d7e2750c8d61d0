use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of one job run, used to correlate log lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of workers attached to the queue; one sentinel is sent to each.
    pub pool_size: usize,
    /// Results folded between two checkpoints.
    pub checkpoint_every: usize,
    /// Results between two progress log lines.
    pub progress_every: usize,
    /// Send sentinels once the stream is exhausted. When false the pool stays attached
    /// for a following job.
    pub release_workers: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            checkpoint_every: 100,
            progress_every: 100,
            release_workers: true,
        }
    }
}

/// Controller-owned counters of a running job.
///
/// `tasks_completed <= tasks_emitted` at all times.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobState {
    /// Upper bound announced by the task stream, for progress only.
    pub tasks_total: usize,
    pub tasks_emitted: u64,
    pub tasks_completed: u64,
    /// Completed tasks whose handler reported a failure.
    pub failures: u64,
    /// Results folded since the last checkpoint.
    pub pending_checkpoint: u64,
    /// `tasks_completed` at the last checkpoint.
    pub last_checkpoint: u64,
    pub checkpoints: u64,
    pub acknowledgments: usize,
    /// Set once the producer has enqueued the last task.
    pub stream_exhausted: bool,
}

impl JobState {
    pub fn new(tasks_total: usize) -> Self {
        Self {
            tasks_total,
            ..Default::default()
        }
    }

    pub fn record_checkpoint(&mut self) {
        self.pending_checkpoint = 0;
        self.last_checkpoint = self.tasks_completed;
        self.checkpoints += 1;
    }

    /// True when every emitted task has a result and every expected worker acknowledged.
    pub fn is_complete(&self, expected_acks: usize) -> bool {
        self.stream_exhausted
            && self.tasks_completed == self.tasks_emitted
            && self.acknowledgments >= expected_acks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job: String,
    pub id: JobId,
    pub tasks: u64,
    /// Results whose handler reported a failure.
    pub failures: u64,
    pub checkpoints: u64,
    pub acknowledgments: usize,
    pub elapsed: Duration,
}

/// How a job ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every task was processed and folded.
    Completed(JobSummary),
    /// The task stream was empty; nothing was dispatched.
    NothingToDo(JobSummary),
}

impl JobOutcome {
    pub fn summary(&self) -> &JobSummary {
        match self {
            JobOutcome::Completed(summary) | JobOutcome::NothingToDo(summary) => summary,
        }
    }

    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, JobOutcome::NothingToDo(_))
    }
}
