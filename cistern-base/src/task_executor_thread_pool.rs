use crate::{ScheduledTask, TaskContext, TaskExecutor};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

// Tasks submitted but not yet finished. Signals the condvar whenever it drops to zero.
#[derive(Default)]
struct ActiveTaskCount {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActiveTaskCount {
    fn increment(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap()
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.idle.wait(count).unwrap();
        }
    }
}

// Thread that takes tasks out of the request channel and ends when the finish channel is signalled
struct TaskExecutorWorkerThread {
    finish_tx: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl TaskExecutorWorkerThread {
    fn new(
        request_rx: Receiver<ScheduledTask>,
        active_task_count: Arc<ActiveTaskCount>,
        thread_index: usize,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(format!("Task Worker {}", thread_index))
            .spawn(move || {
                profiling::register_thread!(&format!("TaskExecutorWorkerThread {}", thread_index));
                let context = TaskContext::new(thread_index);
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            match msg {
                                Ok(task) => {
                                    task.execute(&context);
                                    active_task_count.decrement();
                                }
                                Err(_) => return,
                            }
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(TaskExecutorWorkerThread {
            finish_tx,
            join_handle: Some(join_handle),
        })
    }
}

/// Spawns N worker threads that run submitted tasks in FIFO order, and stops them when dropped.
/// Tasks still queued at that point are abandoned.
pub struct TaskExecutorThreadPool {
    worker_threads: Vec<TaskExecutorWorkerThread>,
    request_tx: Sender<ScheduledTask>,
    active_task_count: Arc<ActiveTaskCount>,
}

impl TaskExecutorThreadPool {
    pub fn new(thread_count: usize) -> std::io::Result<Self> {
        let thread_count = thread_count.max(1);
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<ScheduledTask>();
        let active_task_count = Arc::new(ActiveTaskCount::default());

        let mut worker_threads = Vec::with_capacity(thread_count);
        for thread_index in 0..thread_count {
            let worker = TaskExecutorWorkerThread::new(
                request_rx.clone(),
                active_task_count.clone(),
                thread_index,
            )?;
            worker_threads.push(worker);
        }

        log::debug!("Started task executor with {} threads", thread_count);

        Ok(TaskExecutorThreadPool {
            worker_threads,
            request_tx,
            active_task_count,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.worker_threads.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active_task_count() == 0
    }

    /// Tasks submitted but not yet finished, including queued ones
    pub fn active_task_count(&self) -> usize {
        self.active_task_count.get()
    }

    /// Blocks until no submitted task is queued or running, including tasks submitted by running
    /// tasks. Must not be called from one of the pool's own tasks.
    pub fn wait_idle(&self) {
        profiling::scope!("TaskExecutorThreadPool::wait_idle");
        self.active_task_count.wait_idle();
    }
}

impl TaskExecutor for TaskExecutorThreadPool {
    fn submit(
        &self,
        task: ScheduledTask,
    ) {
        self.active_task_count.increment();
        if let Err(error) = self.request_tx.send(task) {
            self.active_task_count.decrement();
            // Dropping the task here fails its async
            drop(error.into_inner());
        }
    }
}

impl Drop for TaskExecutorThreadPool {
    fn drop(&mut self) {
        for worker_thread in &self.worker_threads {
            let _ = worker_thread.finish_tx.send(());
        }

        let current_thread = std::thread::current().id();
        for worker_thread in &mut self.worker_threads {
            if let Some(join_handle) = worker_thread.join_handle.take() {
                // The last reference to the pool may be released by one of its own tasks
                if join_handle.thread().id() == current_thread {
                    continue;
                }

                if join_handle.join().is_err() {
                    log::error!("Task worker thread panicked");
                }
            }
        }

        log::debug!("Stopped task executor");
    }
}
