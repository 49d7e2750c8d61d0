//! Job Binding Interface
//!
//! A job supplies two capabilities: a lazy stream of tasks and a handler that folds each
//! result into the job's output. The controller is generic over this trait.

use crate::task::types::{Task, TaskResult};

/// A lazy, finite sequence of tasks plus an announced upper bound for progress.
///
/// Items are produced on demand by the controller's producer task, so the stream must
/// be `Send` and own whatever it reads from.
pub struct TaskStream {
    total: usize,
    tasks: Box<dyn Iterator<Item = anyhow::Result<Task>> + Send>,
}

impl TaskStream {
    pub fn new<I>(total: usize, tasks: I) -> Self
    where
        I: Iterator<Item = anyhow::Result<Task>> + Send + 'static,
    {
        Self {
            total,
            tasks: Box::new(tasks),
        }
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let total = tasks.len();
        Self::new(total, tasks.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::from_tasks(Vec::new())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn into_tasks(self) -> Box<dyn Iterator<Item = anyhow::Result<Task>> + Send> {
        self.tasks
    }
}

impl std::fmt::Debug for TaskStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

pub trait JobBinding {
    /// Name used in logs and summaries.
    fn name(&self) -> &str;

    /// Derives the tasks still to be done. Called once per run; a re-run after a crash
    /// calls it again against whatever the last checkpoint persisted.
    fn task_stream(&mut self) -> anyhow::Result<TaskStream>;

    /// Folds one result. Results arrive in any order. With `checkpoint` set, everything
    /// folded so far must be made durable before returning.
    fn handle_result(&mut self, result: TaskResult, checkpoint: bool) -> anyhow::Result<()>;

    /// Makes everything folded so far durable.
    fn checkpoint(&mut self) -> anyhow::Result<()>;
}
