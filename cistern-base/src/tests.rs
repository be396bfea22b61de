use crate::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

fn executor(thread_count: usize) -> Arc<dyn TaskExecutor> {
    Arc::new(TaskExecutorThreadPool::new(thread_count).unwrap())
}

#[test]
fn callback_added_after_completion_runs_immediately() {
    let result = AsyncResult::completed(5u32);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    result.add_on_completion(move |outcome| {
        seen_clone.store(*outcome.unwrap() as usize, Ordering::SeqCst);
    });
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert_eq!(result.wait().unwrap(), 5);
}

#[test]
fn callbacks_run_once_on_completion() {
    let op = AsyncState::<u32>::new();
    let result = AsyncResult::from_op(op.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = calls.clone();
        result.add_on_completion(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(result.status(), AsyncStatus::InProgress);
    assert!(op.set_result(1));
    assert!(!op.set_result(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.result(), Some(&1));
}

#[test]
fn callback_can_query_its_own_async() {
    let op = AsyncState::<u32>::new();
    let result = AsyncResult::from_op(op.clone());
    let observed = Arc::new(Mutex::new(None));
    let observed_clone = observed.clone();
    let result_clone = result.clone();
    result.add_on_completion(move |_| {
        *observed_clone.lock().unwrap() = Some(result_clone.status());
    });
    op.set_result(3);
    assert_eq!(*observed.lock().unwrap(), Some(AsyncStatus::Ok));
}

#[test]
fn join_of_nothing_is_completed() {
    let joined = Async::join(Vec::new());
    assert_eq!(joined.status(), AsyncStatus::Ok);
}

#[test]
fn join_waits_for_all() {
    let a = AsyncState::<()>::new();
    let b = AsyncState::<u32>::new();
    let joined = Async::join([
        AsyncResult::from_op(a.clone()).as_async(),
        AsyncResult::from_op(b.clone()).as_async(),
    ]);
    assert_eq!(joined.status(), AsyncStatus::InProgress);
    a.set_result(());
    assert_eq!(joined.status(), AsyncStatus::InProgress);
    b.set_result(7);
    assert_eq!(joined.status(), AsyncStatus::Ok);
}

#[test]
fn join_fails_on_first_failure() {
    let a = AsyncState::<()>::new();
    let b = AsyncState::<()>::new();
    let joined = Async::join([
        AsyncResult::from_op(a.clone()).as_async(),
        AsyncResult::from_op(b.clone()).as_async(),
    ]);
    b.set_failed(AsyncError::new(TestError("b failed")));
    assert_eq!(joined.status(), AsyncStatus::Failed);
    let error = joined.error().unwrap();
    assert_eq!(error.downcast_ref::<TestError>().unwrap().0, "b failed");
    a.set_result(());
    assert_eq!(joined.status(), AsyncStatus::Failed);
}

#[test]
fn task_runs_after_dependency() {
    let executor = executor(2);
    let gate = AsyncState::<()>::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_clone = order.clone();
    let first = Task::new("first", move |_| {
        order_clone.lock().unwrap().push("first");
        Ok(())
    })
    .schedule(&executor, AsyncResult::from_op(gate.clone()).as_async());

    let order_clone = order.clone();
    let second = Task::new("second", move |_| {
        order_clone.lock().unwrap().push("second");
        Ok(())
    })
    .schedule(&executor, first.as_async());

    assert!(!second.is_completed());
    gate.set_result(());
    assert!(second.wait().is_ok());
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn task_skipped_when_predecessor_fails() {
    let executor = executor(1);
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();
    let task = Task::new("skipped", move |_| {
        ran_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .schedule(
        &executor,
        Async::failed(AsyncError::new(TestError("upstream"))),
    );

    let error = task.wait().unwrap_err();
    assert!(matches!(
        error.downcast_ref::<TaskError>(),
        Some(TaskError::PredecessorFailed(_))
    ));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn task_error_and_panic_fail_the_async() {
    let executor = executor(1);
    let failed = Task::new("failing", |_| Err(AsyncError::new(TestError("nope")))).run(&executor);
    assert_eq!(
        failed.wait().unwrap_err().downcast_ref::<TestError>().unwrap().0,
        "nope"
    );

    let panicked = Task::new("panicking", |_| panic!("boom")).run(&executor);
    assert!(matches!(
        panicked.wait().unwrap_err().downcast_ref::<TaskError>(),
        Some(TaskError::Panicked(_))
    ));

    // The worker survives a panicking task
    assert!(Task::new("after", |_| Ok(())).run(&executor).wait().is_ok());
}

#[test]
fn thread_pool_runs_many_tasks() {
    let pool = Arc::new(TaskExecutorThreadPool::new(4).unwrap());
    let executor: Arc<dyn TaskExecutor> = pool.clone();
    let counter = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let counter = counter.clone();
            Task::new(format!("count {}", i), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .run(&executor)
        })
        .collect();

    Async::join(tasks.iter().map(|t| t.as_async())).wait_completed();
    pool.wait_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 64);
    assert!(pool.is_idle());
}

#[test]
fn released_producer_no_longer_shares_the_value() {
    let executor = executor(2);
    for _ in 0..200 {
        let op = AsyncState::<Arc<u32>>::new();
        let result = AsyncResult::from_op(op.clone());
        Task::new("produce", move |_| {
            AsyncState::set_result_and_release(op, Arc::new(5));
            Ok(())
        })
        .run(&executor);

        // One reference in the outcome held by `result`, one returned by wait
        let value = result.wait().unwrap();
        assert_eq!(Arc::strong_count(&value), 2);
        drop(result);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}

#[test]
fn join_is_notified_after_value_callbacks() {
    let op = AsyncState::<u32>::new();
    let result = AsyncResult::from_op(op.clone());
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_clone = order.clone();
    Async::join([result.as_async()]).add_on_completion(move |_| {
        order_clone.lock().unwrap().push("join");
    });
    let order_clone = order.clone();
    result.add_on_completion(move |_| {
        order_clone.lock().unwrap().push("callback");
    });

    assert!(AsyncState::set_result_and_release(op, 1));
    assert_eq!(*order.lock().unwrap(), vec!["callback", "join"]);
    assert_eq!(result.wait().unwrap(), 1);
}

#[test]
fn wait_idle_includes_chained_tasks() {
    let pool = Arc::new(TaskExecutorThreadPool::new(2).unwrap());
    let executor: Arc<dyn TaskExecutor> = pool.clone();
    let counter = Arc::new(AtomicUsize::new(0));

    let counter_clone = counter.clone();
    let slow = Task::new("slow", move |_| {
        std::thread::sleep(std::time::Duration::from_millis(20));
        counter_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .run(&executor);

    let counter_clone = counter.clone();
    Task::new("after slow", move |_| {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .schedule(&executor, slow.as_async());

    pool.wait_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(pool.active_task_count(), 0);
}
