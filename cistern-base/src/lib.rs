pub mod hashing;

mod asset_id;
pub use asset_id::AssetId;

pub mod async_result;
pub use async_result::{Async, AsyncCallback, AsyncError, AsyncOp, AsyncResult, AsyncState, AsyncStatus};

pub mod task;
pub use task::{ScheduledTask, Task, TaskAsync, TaskContext, TaskError, TaskExecutor};

mod task_executor_thread_pool;
pub use task_executor_thread_pool::TaskExecutorThreadPool;

#[cfg(test)]
mod tests;
