//! Scoped mutual exclusion over shared models.
//!
//! Every model deserialised by a file handler is wrapped in a
//! [`ModelContext`]; clones of the context share the same model. Access goes
//! through [`with`](ModelContext::with), which hands the closure a mutable
//! reference that cannot outlive the critical section. Two concurrent
//! acquisitions never overlap.
//!
//! A handler declares whether its models are safe to touch from the worker
//! thread. Contexts over non-thread-safe models should only be acquired on
//! the UI thread; the flag is carried so the module layer can decide what may
//! cross threads, but the convention is not enforced here.
//!
//! The lock is not re-entrant. Acquiring a context inside its own `with`
//! closure deadlocks.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProjectError, Result};

/// A type-erased model as produced by a file handler.
pub type BoxedModel = Box<dyn Any + Send>;

/// The context wrapping every cached model.
pub type ModelHandle = ModelContext<BoxedModel>;

/// Scoped, mutually exclusive access to a shared model.
pub struct ModelContext<T> {
    inner: Arc<Mutex<T>>,
    thread_safe: bool,
}

impl<T> Clone for ModelContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            thread_safe: self.thread_safe,
        }
    }
}

impl<T> std::fmt::Debug for ModelContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("thread_safe", &self.thread_safe)
            .finish_non_exhaustive()
    }
}

impl<T> ModelContext<T> {
    /// Wrap a model that must stay on the UI thread.
    pub fn new(value: T) -> Self {
        Self::with_thread_safety(value, false)
    }

    /// Wrap a model that may be accessed from the worker.
    pub fn thread_safe(value: T) -> Self {
        Self::with_thread_safety(value, true)
    }

    /// Wrap a model with an explicit thread-safety declaration.
    pub fn with_thread_safety(value: T, thread_safe: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
            thread_safe,
        }
    }

    /// Whether the wrapped model was declared safe for worker access.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// Acquire the model for the scope of the closure.
    ///
    /// Blocks until the context is free. The reference handed to the
    /// closure cannot escape the call.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Acquire without blocking.
    ///
    /// Returns `None` if the context is currently held. Useful on the UI
    /// thread, which should never wait on a worker-held lock.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.inner.try_lock()?;
        Some(f(&mut guard))
    }

    /// Whether two contexts wrap the same model.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ModelContext<BoxedModel> {
    /// Acquire the model downcast to its concrete type.
    ///
    /// Fails with a contract error if the model is not an `M`.
    pub fn with_as<M: Any, R>(&self, f: impl FnOnce(&mut M) -> R) -> Result<R> {
        let mut guard = self.inner.lock();
        match guard.downcast_mut::<M>() {
            Some(model) => Ok(f(model)),
            None => Err(ProjectError::contract(format!(
                "cached model is not a {}",
                std::any::type_name::<M>()
            ))),
        }
    }
}

static_assertions::assert_impl_all!(ModelHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_scoped_access() {
        let context = ModelContext::new(vec![1, 2, 3]);
        context.with(|v| v.push(4));
        assert_eq!(context.with(|v| v.len()), 4);
    }

    #[test]
    fn test_clones_share_the_model() {
        let a = ModelContext::new(0_u32);
        let b = a.clone();
        a.with(|v| *v = 7);
        assert_eq!(b.with(|v| *v), 7);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_identity_is_per_wrap() {
        let a = ModelContext::new(1_u32);
        let b = ModelContext::new(1_u32);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_try_with_when_held() {
        let context = Arc::new(ModelContext::thread_safe(0_u32));

        let context_clone = context.clone();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            context_clone.with(|_| {
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
            });
        });

        started_rx.recv().unwrap();
        assert!(context.try_with(|_| ()).is_none());
        handle.join().unwrap();
        assert!(context.try_with(|_| ()).is_some());
    }

    #[test]
    fn test_critical_sections_do_not_overlap() {
        // Two threads record enter/exit instants; the sections must be
        // disjoint in wall-clock time.
        let context = Arc::new(ModelContext::thread_safe(()));
        let spans = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let context_clone = context.clone();
            let spans_clone = spans.clone();
            handles.push(thread::spawn(move || {
                context_clone.with(|_| {
                    let enter = Instant::now();
                    thread::sleep(Duration::from_millis(50));
                    let exit = Instant::now();
                    spans_clone.lock().push((enter, exit));
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let spans = spans.lock();
        assert_eq!(spans.len(), 2);
        let (enter_a, exit_a) = spans[0];
        let (enter_b, exit_b) = spans[1];
        assert!(exit_a <= enter_b || exit_b <= enter_a);
    }

    #[test]
    fn test_downcast_access() {
        let model: BoxedModel = Box::new(String::from("stats"));
        let handle = ModelHandle::thread_safe(model);

        let len = handle.with_as::<String, _>(|s| {
            s.push_str("!");
            s.len()
        });
        assert_eq!(len.unwrap(), 6);

        let wrong = handle.with_as::<u32, _>(|_| ());
        assert!(wrong.is_err());
    }

    #[test]
    fn test_thread_safety_flag() {
        let safe = ModelContext::thread_safe(());
        let unsafe_ = ModelContext::new(());
        assert!(safe.is_thread_safe());
        assert!(!unsafe_.is_thread_safe());
    }
}
