use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AsyncStatus {
    InProgress,
    Ok,
    Failed,
}

/// Type-erased failure carried by a completed async operation. Cheap to clone so the same error
/// can be delivered to every waiter.
#[derive(Clone)]
pub struct AsyncError(Arc<dyn Error + Send + Sync>);

impl AsyncError {
    pub fn new<E: Error + Send + Sync + 'static>(error: E) -> Self {
        AsyncError(Arc::new(error))
    }

    pub fn from_boxed(error: Box<dyn Error + Send + Sync>) -> Self {
        AsyncError(Arc::from(error))
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn is<E: Error + 'static>(&self) -> bool {
        self.0.is::<E>()
    }
}

impl fmt::Debug for AsyncError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for AsyncError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl Error for AsyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

pub type AsyncCallback<T> = Box<dyn FnOnce(Result<&T, &AsyncError>) + Send>;

type AsyncNotification = Box<dyn FnOnce(Result<(), &AsyncError>) + Send>;

#[derive(Default)]
struct AsyncSignalState {
    settled: Option<Result<(), AsyncError>>,
    notifications: Vec<AsyncNotification>,
}

// Value-free half of an operation: blocked waiters and untyped notifications. It is settled
// after the value callbacks have run, and can outlive the value.
#[derive(Default)]
struct AsyncSignal {
    state: Mutex<AsyncSignalState>,
    condvar: Condvar,
}

impl AsyncSignal {
    fn settle(
        &self,
        outcome: Result<(), AsyncError>,
    ) {
        let notifications = {
            let mut state = self.state.lock().unwrap();
            if state.settled.is_some() {
                return;
            }
            state.settled = Some(outcome.clone());
            std::mem::take(&mut state.notifications)
        };

        self.condvar.notify_all();
        for notification in notifications {
            notification(outcome.as_ref().map(|_| ()));
        }
    }

    fn notify_on_completion(
        &self,
        notification: AsyncNotification,
    ) {
        let settled = {
            let mut state = self.state.lock().unwrap();
            match &state.settled {
                Some(outcome) => outcome.clone(),
                None => {
                    state.notifications.push(notification);
                    return;
                }
            }
        };

        notification(settled.as_ref().map(|_| ()));
    }

    fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while state.settled.is_none() {
            state = self.condvar.wait(state).unwrap();
        }
    }
}

/// Shared completion state of a single async operation.
///
/// The outcome is written once. Completion then happens in two steps on the completing thread,
/// both after the internal locks have been released:
/// - callbacks added with [`AsyncState::add_on_completion`] run with a reference to the value
/// - blocked waiters are woken and untyped notifications ([`Async`] joins and task
///   dependencies) run
///
/// A callback may freely query or chain on its own operation but must not block on it.
pub struct AsyncState<T: Send + Sync + 'static> {
    outcome: OnceLock<Result<T, AsyncError>>,
    callbacks: Mutex<Vec<AsyncCallback<T>>>,
    signal: Arc<AsyncSignal>,
}

/// Producer side of an async operation
pub type AsyncOp<T> = Arc<AsyncState<T>>;

impl<T: Send + Sync + 'static> AsyncState<T> {
    pub fn new() -> AsyncOp<T> {
        Arc::new(AsyncState {
            outcome: OnceLock::new(),
            callbacks: Mutex::new(Vec::default()),
            signal: Arc::new(AsyncSignal::default()),
        })
    }

    /// Returns false if the operation was already completed, in which case `value` is dropped
    pub fn set_result(
        &self,
        value: T,
    ) -> bool {
        match self.store(Ok(value)) {
            Some(settled) => {
                self.signal.settle(settled);
                true
            }
            None => false,
        }
    }

    /// Returns false if the operation was already completed
    pub fn set_failed(
        &self,
        error: AsyncError,
    ) -> bool {
        match self.store(Err(error)) {
            Some(settled) => {
                self.signal.settle(settled);
                true
            }
            None => false,
        }
    }

    /// Like [`AsyncState::set_result`], but drops `this` before waking waiters and running
    /// untyped notifications. Once a waiter returns from `wait_completed`, the value is only
    /// shared by the remaining [`AsyncResult`] handles.
    pub fn set_result_and_release(
        this: AsyncOp<T>,
        value: T,
    ) -> bool {
        Self::complete_and_release(this, Ok(value))
    }

    /// Like [`AsyncState::set_failed`], but drops `this` before waking waiters
    pub fn set_failed_and_release(
        this: AsyncOp<T>,
        error: AsyncError,
    ) -> bool {
        Self::complete_and_release(this, Err(error))
    }

    // Writes the outcome and runs the value callbacks. Returns the outcome to settle the signal
    // with, or None if the operation was already completed.
    fn store(
        &self,
        outcome: Result<T, AsyncError>,
    ) -> Option<Result<(), AsyncError>> {
        let callbacks = {
            let mut callbacks = self.callbacks.lock().unwrap();
            if self.outcome.set(outcome).is_err() {
                return None;
            }
            std::mem::take(&mut *callbacks)
        };

        let outcome = self.outcome.get()?;
        for callback in callbacks {
            callback(outcome.as_ref());
        }

        Some(match outcome {
            Ok(_) => Ok(()),
            Err(error) => Err(error.clone()),
        })
    }

    fn complete_and_release(
        this: AsyncOp<T>,
        outcome: Result<T, AsyncError>,
    ) -> bool {
        let Some(settled) = this.store(outcome) else {
            return false;
        };

        let signal = this.signal.clone();
        drop(this);
        signal.settle(settled);
        true
    }

    pub fn status(&self) -> AsyncStatus {
        match self.outcome.get() {
            None => AsyncStatus::InProgress,
            Some(Ok(_)) => AsyncStatus::Ok,
            Some(Err(_)) => AsyncStatus::Failed,
        }
    }

    pub fn add_on_completion(
        &self,
        callback: AsyncCallback<T>,
    ) {
        {
            let mut callbacks = self.callbacks.lock().unwrap();
            if self.outcome.get().is_none() {
                callbacks.push(callback);
                return;
            }
        }

        if let Some(outcome) = self.outcome.get() {
            callback(outcome.as_ref());
        }
    }

    pub fn wait_completed(&self) -> &Result<T, AsyncError> {
        loop {
            self.signal.wait();
            if let Some(outcome) = self.outcome.get() {
                return outcome;
            }
        }
    }

    pub fn outcome(&self) -> Option<&Result<T, AsyncError>> {
        self.outcome.get()
    }
}

/// Consumer handle to an async operation producing `T`.
///
/// Handles are cheap to clone and every clone observes the same outcome.
pub struct AsyncResult<T: Send + Sync + 'static> {
    state: AsyncOp<T>,
}

impl<T: Send + Sync + 'static> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> AsyncResult<T> {
    pub fn from_op(state: AsyncOp<T>) -> Self {
        AsyncResult { state }
    }

    pub fn completed(value: T) -> Self {
        let state = AsyncState::new();
        state.set_result(value);
        AsyncResult { state }
    }

    pub fn failed(error: AsyncError) -> Self {
        let state = AsyncState::new();
        state.set_failed(error);
        AsyncResult { state }
    }

    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    pub fn is_completed(&self) -> bool {
        self.status() != AsyncStatus::InProgress
    }

    pub fn is_ok(&self) -> bool {
        self.status() == AsyncStatus::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.status() == AsyncStatus::Failed
    }

    /// Blocks the calling thread until the operation completes. Must not be called from a task
    /// the operation itself is waiting on.
    pub fn wait_completed(&self) -> &Result<T, AsyncError> {
        profiling::scope!("AsyncResult::wait_completed");
        self.state.wait_completed()
    }

    /// Non-blocking access to the value, if the operation completed successfully
    pub fn result(&self) -> Option<&T> {
        match self.state.outcome() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AsyncError> {
        match self.state.outcome() {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    pub fn add_on_completion<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce(Result<&T, &AsyncError>) + Send + 'static,
    {
        self.state.add_on_completion(Box::new(callback));
    }

    pub fn as_async(&self) -> Async {
        Async(self.state.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncResult<T> {
    /// Blocks until completion and returns a copy of the outcome
    pub fn wait(&self) -> Result<T, AsyncError> {
        self.wait_completed().clone()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for AsyncResult<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("status", &self.status())
            .finish()
    }
}

// Value-agnostic view of an async operation, used for joins and task dependencies
trait AsyncNotify: Send + Sync {
    fn status(&self) -> AsyncStatus;
    fn error(&self) -> Option<AsyncError>;
    fn notify_on_completion(
        &self,
        notification: AsyncNotification,
    );
    fn wait(&self);
}

impl<T: Send + Sync + 'static> AsyncNotify for AsyncState<T> {
    fn status(&self) -> AsyncStatus {
        AsyncState::status(self)
    }

    fn error(&self) -> Option<AsyncError> {
        match self.outcome() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    fn notify_on_completion(
        &self,
        notification: AsyncNotification,
    ) {
        self.signal.notify_on_completion(notification);
    }

    fn wait(&self) {
        self.signal.wait();
    }
}

/// Untyped async handle. Only exposes completion and status, which is all that is needed to
/// express "run this after those".
#[derive(Clone)]
pub struct Async(Arc<dyn AsyncNotify>);

impl Async {
    pub fn completed() -> Async {
        AsyncResult::completed(()).as_async()
    }

    pub fn failed(error: AsyncError) -> Async {
        AsyncResult::<()>::failed(error).as_async()
    }

    /// Combines several asyncs into one that succeeds once every input has succeeded, or fails
    /// as soon as any input fails. Joining nothing yields an already completed async.
    pub fn join<I: IntoIterator<Item = Async>>(asyncs: I) -> Async {
        let asyncs: Vec<Async> = asyncs.into_iter().collect();
        if asyncs.is_empty() {
            return Async::completed();
        }

        let joined = AsyncState::<()>::new();
        let remaining = Arc::new(AtomicUsize::new(asyncs.len()));
        for dependency in asyncs {
            let joined = joined.clone();
            let remaining = remaining.clone();
            dependency
                .0
                .notify_on_completion(Box::new(move |outcome: Result<(), &AsyncError>| match outcome {
                    Ok(()) => {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            joined.set_result(());
                        }
                    }
                    Err(error) => {
                        joined.set_failed(error.clone());
                    }
                }));
        }

        Async(joined)
    }

    pub fn status(&self) -> AsyncStatus {
        self.0.status()
    }

    pub fn is_completed(&self) -> bool {
        self.status() != AsyncStatus::InProgress
    }

    pub fn is_failed(&self) -> bool {
        self.status() == AsyncStatus::Failed
    }

    pub fn error(&self) -> Option<AsyncError> {
        self.0.error()
    }

    pub fn add_on_completion<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce(Result<(), &AsyncError>) + Send + 'static,
    {
        self.0.notify_on_completion(Box::new(callback));
    }

    pub fn wait_completed(&self) {
        profiling::scope!("Async::wait_completed");
        self.0.wait();
    }
}

impl fmt::Debug for Async {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Async")
            .field("status", &self.status())
            .finish()
    }
}
