use crate::{Async, AsyncError, AsyncOp, AsyncResult, AsyncState};
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    // One of the asyncs the task was scheduled after failed, the body was never run
    PredecessorFailed(Arc<str>),
    Panicked(Arc<str>),
    // The executor shut down before running the task
    Abandoned(Arc<str>),
}

impl Error for TaskError {}

impl fmt::Display for TaskError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TaskError::PredecessorFailed(name) => {
                write!(f, "task {} skipped: a predecessor failed", name)
            }
            TaskError::Panicked(name) => write!(f, "task {} panicked", name),
            TaskError::Abandoned(name) => write!(f, "task {} was never run", name),
        }
    }
}

/// Information about the worker running a task
pub struct TaskContext {
    thread_index: usize,
}

impl TaskContext {
    pub fn new(thread_index: usize) -> Self {
        TaskContext { thread_index }
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }
}

pub type TaskRunnable = Box<dyn FnOnce(&TaskContext) -> Result<(), AsyncError> + Send>;

/// Handle to a scheduled task's completion
pub type TaskAsync = AsyncResult<()>;

/// A named unit of work. Tasks are submitted to a [`TaskExecutor`] either right away or once the
/// asyncs they depend on have completed.
pub struct Task {
    name: Arc<str>,
    runnable: TaskRunnable,
}

impl Task {
    pub fn new<F>(
        name: impl Into<Arc<str>>,
        runnable: F,
    ) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<(), AsyncError> + Send + 'static,
    {
        Task {
            name: name.into(),
            runnable: Box::new(runnable),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(
        self,
        executor: &Arc<dyn TaskExecutor>,
    ) -> TaskAsync {
        self.schedule(executor, Async::completed())
    }

    /// Submits the task once `depends_on` succeeds. If `depends_on` fails the body is never run
    /// and the returned async fails with [`TaskError::PredecessorFailed`].
    pub fn schedule(
        self,
        executor: &Arc<dyn TaskExecutor>,
        depends_on: Async,
    ) -> TaskAsync {
        let op = AsyncState::<()>::new();
        let task_async = AsyncResult::from_op(op.clone());
        let executor = executor.clone();

        depends_on.add_on_completion(move |outcome| match outcome {
            Ok(()) => executor.submit(ScheduledTask::new(self, op)),
            Err(error) => {
                log::trace!("Skipping task {}: {}", self.name, error);
                op.set_failed(AsyncError::new(TaskError::PredecessorFailed(self.name)));
            }
        });

        task_async
    }
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// A task whose dependencies are satisfied, ready to be run by an executor. Dropping it without
/// calling [`ScheduledTask::execute`] fails its async with [`TaskError::Abandoned`].
pub struct ScheduledTask {
    name: Arc<str>,
    runnable: Option<TaskRunnable>,
    op: AsyncOp<()>,
}

impl ScheduledTask {
    fn new(
        task: Task,
        op: AsyncOp<()>,
    ) -> Self {
        ScheduledTask {
            name: task.name,
            runnable: Some(task.runnable),
            op,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execute(
        mut self,
        context: &TaskContext,
    ) {
        let Some(runnable) = self.runnable.take() else {
            return;
        };

        profiling::scope!(&format!("Task {}", self.name));
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| runnable(context)));
        match result {
            Ok(Ok(())) => {
                self.op.set_result(());
            }
            Ok(Err(error)) => {
                self.op.set_failed(error);
            }
            Err(_) => {
                log::error!("Task {} panicked", self.name);
                self.op
                    .set_failed(AsyncError::new(TaskError::Panicked(self.name.clone())));
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if self.runnable.is_some() {
            log::warn!("Task {} dropped without running", self.name);
            self.op
                .set_failed(AsyncError::new(TaskError::Abandoned(self.name.clone())));
        }
    }
}

/// Runs scheduled tasks. Implementations decide which thread a task runs on.
pub trait TaskExecutor: Send + Sync {
    fn submit(
        &self,
        task: ScheduledTask,
    );
}
