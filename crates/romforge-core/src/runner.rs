//! Background task runner for project operations.
//!
//! This module provides [`AsyncRunner`], a single dedicated worker thread
//! with a FIFO task queue. Long-running project operations (opening a ROM,
//! saving, constructing views) run here so the UI thread never blocks on
//! disk or CPU. Results flow back to the UI through the runner's
//! [`UiDispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use romforge_core::{AsyncRunner, UiDispatcher};
//!
//! let dispatcher = Arc::new(UiDispatcher::new());
//! let runner = AsyncRunner::new(dispatcher.clone());
//!
//! // Await a result.
//! let handle = runner.submit(|| 2 + 2).unwrap();
//! assert_eq!(handle.wait(), Some(4));
//!
//! // Fire-and-forget with a UI-side completion.
//! let runner_ref = runner.clone_dispatcher();
//! runner.submit(move || {
//!     let report = "done".to_string();
//!     runner_ref.post(move || println!("{report}"));
//! });
//!
//! runner.stop();
//! runner.join();
//! ```
//!
//! # Scheduling model
//!
//! Tasks run one at a time in submission order. There is no fine-grained
//! cancellation of a running task; [`AsyncRunner::stop`] lets the current
//! task finish, drains the queue, and rejects further submissions. Tasks
//! that want to react to shutdown can poll the runner's
//! [`CancellationToken`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex};

use crate::dispatch::UiDispatcher;

/// Default capacity for the runner's task queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A token for cooperative cancellation.
///
/// Tasks can poll [`is_cancelled`](Self::is_cancelled) and exit early. The
/// runner cancels its token when [`AsyncRunner::stop`] is called; callers
/// may also create and inject their own tokens.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Configuration for creating an [`AsyncRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Name for the worker thread.
    pub name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
    /// Capacity of the task queue.
    pub queue_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "romforge-worker".to_string(),
            stack_size: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl RunnerConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating runners with custom configuration.
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    config: RunnerConfig,
}

impl RunnerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size for the worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Set the task queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Build and start the runner.
    pub fn build(self, dispatcher: Arc<UiDispatcher>) -> AsyncRunner {
        AsyncRunner::with_config(dispatcher, self.config)
    }
}

/// A handle to an in-flight task.
///
/// Dropping the handle detaches the task; it still runs to completion.
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes and return its result.
    ///
    /// Returns `None` if the task panicked or the runner shut down before
    /// the task ran.
    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block until the task completes or the timeout elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Check for the result without blocking.
    pub fn try_wait(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

/// A task sent to the worker thread.
enum RunnerTask {
    /// Execute a boxed task.
    Execute(Box<dyn FnOnce() + Send>),
    /// Shutdown signal.
    Shutdown,
}

/// Internal state shared between the runner handle and the worker thread.
struct RunnerState {
    /// Whether the runner accepts submissions.
    running: AtomicBool,
    /// Cancellation token for cooperative shutdown.
    cancellation: CancellationToken,
    /// Count of tasks in the queue or executing.
    pending_tasks: AtomicUsize,
    /// Condvar for waiting on shutdown.
    shutdown_condvar: Condvar,
    /// Mutex for the condvar.
    shutdown_mutex: Mutex<()>,
}

impl RunnerState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            cancellation: CancellationToken::new(),
            pending_tasks: AtomicUsize::new(0),
            shutdown_condvar: Condvar::new(),
            shutdown_mutex: Mutex::new(()),
        }
    }

    fn signal_shutdown(&self) {
        let _guard = self.shutdown_mutex.lock();
        self.shutdown_condvar.notify_all();
    }
}

/// The single background worker that runs project operations.
///
/// `AsyncRunner` is `Send + Sync`; multiple threads may submit tasks
/// concurrently, and tasks are executed strictly in submission order.
pub struct AsyncRunner {
    /// Channel sender for submitting tasks.
    task_sender: Sender<RunnerTask>,
    /// Thread handle for joining.
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Shared state with the worker thread.
    state: Arc<RunnerState>,
    /// Dispatch queue for reaching the UI thread.
    dispatcher: Arc<UiDispatcher>,
}

impl AsyncRunner {
    /// Create a new runner with default configuration.
    ///
    /// The worker thread starts immediately and begins processing tasks.
    pub fn new(dispatcher: Arc<UiDispatcher>) -> Self {
        Self::with_config(dispatcher, RunnerConfig::default())
    }

    /// Create a new runner with custom configuration.
    pub fn with_config(dispatcher: Arc<UiDispatcher>, config: RunnerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);
        let state = Arc::new(RunnerState::new());

        let thread_state = state.clone();
        let mut builder = thread::Builder::new().name(config.name);
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder
            .spawn(move || {
                worker_loop(receiver, thread_state.clone());
                thread_state.running.store(false, Ordering::Release);
                thread_state.signal_shutdown();
            })
            .expect("Failed to spawn runner thread");

        Self {
            task_sender: sender,
            handle: Mutex::new(Some(handle)),
            state,
            dispatcher,
        }
    }

    /// Submit a task for execution on the worker thread.
    ///
    /// Returns a [`TaskHandle`] that can be awaited, or `None` if the runner
    /// has been stopped or the queue is full. Discarding the handle is fine
    /// for fire-and-forget work.
    pub fn submit<T, F>(&self, task: F) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if !self.is_running() {
            return None;
        }

        let (result_sender, result_receiver) = bounded(1);
        self.state.pending_tasks.fetch_add(1, Ordering::AcqRel);

        let boxed: Box<dyn FnOnce() + Send> = Box::new(move || {
            let value = task();
            // Receiver may have been dropped for fire-and-forget tasks.
            let _ = result_sender.send(value);
        });

        match self.task_sender.try_send(RunnerTask::Execute(boxed)) {
            Ok(()) => Some(TaskHandle {
                receiver: result_receiver,
            }),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                None
            }
        }
    }

    /// Post a closure to the UI thread.
    ///
    /// This is the only way worker tasks may touch UI state.
    pub fn post_to_ui<F>(&self, call: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.post(call);
    }

    /// The dispatcher this runner posts UI calls through.
    pub fn dispatcher(&self) -> &Arc<UiDispatcher> {
        &self.dispatcher
    }

    /// Clone the dispatcher handle for moving into tasks.
    pub fn clone_dispatcher(&self) -> Arc<UiDispatcher> {
        self.dispatcher.clone()
    }

    /// Check if the runner accepts submissions.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Number of tasks queued or executing.
    pub fn pending_tasks(&self) -> usize {
        self.state.pending_tasks.load(Ordering::Acquire)
    }

    /// The runner's cancellation token.
    ///
    /// Cancelled when [`stop`](Self::stop) is called; long tasks can poll it
    /// to exit early.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.state.cancellation
    }

    /// Request shutdown after draining queued tasks.
    ///
    /// Non-blocking and idempotent. New submissions are rejected
    /// immediately; use [`join`](Self::join) to wait for the drain.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        self.state.cancellation.cancel();
        let _ = self.task_sender.try_send(RunnerTask::Shutdown);
    }

    /// Wait for the worker thread to finish.
    ///
    /// Returns `true` if the worker was joined, `false` if already joined
    /// or the thread panicked.
    pub fn join(&self) -> bool {
        let mut handle = self.handle.lock();
        if let Some(h) = handle.take() {
            h.join().is_ok()
        } else {
            false
        }
    }

    /// Stop the runner and wait for it to finish.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }

    /// Wait for the runner to finish with a timeout.
    ///
    /// Returns `true` if the runner finished within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }

        let guard = self.state.shutdown_mutex.lock();
        let result = self
            .state
            .shutdown_condvar
            .wait_for(&mut { guard }, timeout);
        !result.timed_out() || !self.is_running()
    }
}

impl Drop for AsyncRunner {
    fn drop(&mut self) {
        self.stop();
        // Don't block in drop.
    }
}

static_assertions::assert_impl_all!(AsyncRunner: Send, Sync);

/// Run one boxed task, containing any panic.
fn run_task(task: Box<dyn FnOnce() + Send>) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(task));
    if let Err(payload) = outcome {
        let message = panic_message(payload.as_ref());
        tracing::error!(target: "romforge_core::runner", message, "task panicked");
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// The main loop processing tasks on the worker thread.
fn worker_loop(receiver: Receiver<RunnerTask>, state: Arc<RunnerState>) {
    while !state.cancellation.is_cancelled() || state.pending_tasks.load(Ordering::Acquire) > 0 {
        // Use a timeout so shutdown is noticed even with an empty queue.
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(RunnerTask::Execute(task)) => {
                run_task(task);
                state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(RunnerTask::Shutdown) => {
                // Drain remaining tasks before exiting.
                while let Ok(task) = receiver.try_recv() {
                    match task {
                        RunnerTask::Execute(t) => {
                            run_task(t);
                            state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                        }
                        RunnerTask::Shutdown => continue,
                    }
                }
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if state.cancellation.is_cancelled()
                    && state.pending_tasks.load(Ordering::Acquire) == 0
                {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn runner() -> AsyncRunner {
        AsyncRunner::new(Arc::new(UiDispatcher::new()))
    }

    #[test]
    fn test_runner_creation() {
        let runner = runner();
        assert!(runner.is_running());
        assert_eq!(runner.pending_tasks(), 0);
        runner.stop_and_join();
    }

    #[test]
    fn test_runner_with_builder() {
        let runner = RunnerBuilder::new()
            .name("test-runner")
            .queue_capacity(64)
            .build(Arc::new(UiDispatcher::new()));

        assert!(runner.is_running());
        runner.stop_and_join();
    }

    #[test]
    fn test_submit_and_wait() {
        let runner = runner();

        let handle = runner.submit(|| 40 + 2).expect("runner accepts task");
        assert_eq!(handle.wait(), Some(42));

        runner.stop_and_join();
    }

    #[test]
    fn test_fifo_order() {
        let runner = runner();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let order_clone = order.clone();
            handles.push(runner.submit(move || {
                order_clone.lock().push(i);
            }));
        }
        for handle in handles.into_iter().flatten() {
            handle.wait();
        }

        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
        runner.stop_and_join();
    }

    #[test]
    fn test_submit_after_stop() {
        let runner = runner();
        runner.stop();

        assert!(runner.submit(|| 1).is_none());
        runner.join();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let runner = runner();
        runner.stop();
        runner.stop();
        assert!(runner.join());
        assert!(!runner.join());
    }

    #[test]
    fn test_graceful_drain() {
        let runner = runner();
        let counter = Arc::new(AtomicI32::new(0));

        for _ in 0..5 {
            let counter_clone = counter.clone();
            runner.submit(move || {
                thread::sleep(Duration::from_millis(10));
                counter_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        runner.stop();
        runner.join();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panic_is_contained() {
        let runner = runner();

        let panicking = runner.submit(|| panic!("boom")).unwrap();
        assert_eq!(panicking.wait(), None);

        // The worker survives and runs the next task.
        let handle = runner.submit(|| "alive").unwrap();
        assert_eq!(handle.wait(), Some("alive"));

        runner.stop_and_join();
    }

    #[test]
    fn test_post_to_ui_via_dispatcher() {
        let dispatcher = Arc::new(UiDispatcher::new());
        dispatcher.bind_current_thread();
        let runner = AsyncRunner::new(dispatcher.clone());

        let result = Arc::new(Mutex::new(None));
        let result_clone = result.clone();
        let dispatcher_for_task = runner.clone_dispatcher();
        let handle = runner
            .submit(move || {
                let value = 7 * 6;
                dispatcher_for_task.post(move || {
                    *result_clone.lock() = Some(value);
                });
            })
            .unwrap();
        handle.wait();

        assert!(result.lock().is_none());
        dispatcher.process_pending();
        assert_eq!(*result.lock(), Some(42));

        runner.stop_and_join();
    }

    #[test]
    fn test_wait_timeout() {
        let runner = runner();

        assert!(!runner.wait_timeout(Duration::from_millis(50)));
        runner.stop();
        assert!(runner.wait_timeout(Duration::from_millis(500)));
    }

    #[test]
    fn test_cancellation_token() {
        let runner = runner();
        assert!(!runner.cancellation_token().is_cancelled());

        let token = runner.cancellation_token().clone();
        let iterations = Arc::new(AtomicI32::new(0));
        let iterations_clone = iterations.clone();
        runner.submit(move || {
            for _ in 0..100 {
                if token.is_cancelled() {
                    return;
                }
                iterations_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
            }
        });

        thread::sleep(Duration::from_millis(25));
        runner.stop();
        runner.join();

        assert!(iterations.load(Ordering::SeqCst) < 100);
        assert!(runner.cancellation_token().is_cancelled());
    }
}
