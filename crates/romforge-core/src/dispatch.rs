//! UI-thread dispatch queue.
//!
//! The core never touches UI state from the worker directly. Instead, worker
//! code posts closures to a [`UiDispatcher`] and the GUI pumps them from its
//! own event loop via [`UiDispatcher::process_pending`]. This is the single
//! hand-off point between the worker thread and the UI thread.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use romforge_core::UiDispatcher;
//!
//! let dispatcher = Arc::new(UiDispatcher::new());
//! dispatcher.bind_current_thread();
//!
//! dispatcher.post(|| println!("runs on the UI thread"));
//! let executed = dispatcher.process_pending();
//! assert_eq!(executed, 1);
//! ```
//!
//! # Unbound fallback
//!
//! When no UI thread has been bound (early initialization, tests), posted
//! closures execute immediately on the calling thread instead of queueing
//! forever.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::thread::ThreadId;

use parking_lot::Mutex;

/// A boxed deferred call.
type QueuedCall = Box<dyn FnOnce() + Send + 'static>;

/// Thread affinity marker for objects that must stay on one thread.
///
/// Captures the creating thread and lets the holder assert that later
/// accesses happen on the same thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadAffinity {
    thread: ThreadId,
}

impl ThreadAffinity {
    /// Capture the current thread.
    pub fn current() -> Self {
        Self {
            thread: std::thread::current().id(),
        }
    }

    /// Check whether the current thread matches the captured one.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Assert same-thread access in debug builds only.
    #[inline]
    pub fn debug_assert_same_thread(&self) {
        debug_assert!(
            self.is_same_thread(),
            "object accessed from a different thread than it was created on"
        );
    }
}

/// Queue of deferred calls bound for the UI thread.
///
/// The GUI binds its event-loop thread once at startup and then pumps the
/// queue from that loop. Every other component that needs to reach the UI
/// goes through [`post`](Self::post).
pub struct UiDispatcher {
    /// Pending calls in post order.
    queue: Mutex<VecDeque<QueuedCall>>,
    /// The bound UI thread, set at most once.
    ui_thread: OnceLock<ThreadId>,
}

impl UiDispatcher {
    /// Create a new dispatcher with no bound UI thread.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ui_thread: OnceLock::new(),
        }
    }

    /// Bind the calling thread as the UI thread.
    ///
    /// Calling again from the same thread is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if a different thread was already bound.
    pub fn bind_current_thread(&self) {
        let current = std::thread::current().id();
        if self.ui_thread.set(current).is_err() && self.ui_thread.get() != Some(&current) {
            panic!("UiDispatcher is already bound to a different thread");
        }
    }

    /// Check if the current thread is the bound UI thread.
    ///
    /// Returns `true` when no thread has been bound yet, so single-threaded
    /// callers work without an explicit bind.
    #[inline]
    pub fn is_ui_thread(&self) -> bool {
        match self.ui_thread.get() {
            Some(id) => *id == std::thread::current().id(),
            None => true,
        }
    }

    /// Whether a UI thread has been bound.
    pub fn is_bound(&self) -> bool {
        self.ui_thread.get().is_some()
    }

    /// Post a closure for execution on the UI thread.
    ///
    /// Calls are executed in post order by [`process_pending`](Self::process_pending).
    /// If no UI thread is bound the closure runs immediately on the calling
    /// thread.
    pub fn post<F>(&self, call: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_bound() {
            tracing::warn!(
                target: "romforge_core::dispatch",
                "no UI thread bound, executing posted call immediately"
            );
            call();
            return;
        }
        self.queue.lock().push_back(Box::new(call));
    }

    /// Execute all calls that were pending when this method was entered.
    ///
    /// Must be called from the UI thread. Calls posted while processing are
    /// left for the next pump, which keeps a re-posting call from starving
    /// the loop.
    ///
    /// Returns the number of calls executed.
    pub fn process_pending(&self) -> usize {
        if let Some(bound) = self.ui_thread.get() {
            debug_assert_eq!(
                *bound,
                std::thread::current().id(),
                "process_pending must run on the bound UI thread"
            );
        }

        let batch: Vec<QueuedCall> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        let count = batch.len();
        for call in batch {
            call();
        }
        if count > 0 {
            tracing::trace!(target: "romforge_core::dispatch", count, "processed UI calls");
        }
        count
    }

    /// Number of calls waiting to be pumped.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for UiDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(UiDispatcher: Send, Sync);
