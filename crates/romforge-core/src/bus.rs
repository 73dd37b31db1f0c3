//! Typed pub-sub bridge between the core and the UI.
//!
//! [`UiEventBus`] delivers [`UiSignal`] values to subscribers, always on the
//! UI thread: emissions from the UI thread run the listeners inline,
//! emissions from the worker are routed through the [`UiDispatcher`] and run
//! when the GUI pumps it. Listeners run in registration order; a panicking
//! listener is logged and contained, the remaining listeners still run.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use romforge_core::{SignalKind, UiDispatcher, UiEventBus, UiSignal};
//!
//! let bus = UiEventBus::new(Arc::new(UiDispatcher::new()));
//!
//! bus.subscribe(SignalKind::ProjectSaved, |_signal| {
//!     println!("saved");
//! });
//!
//! bus.emit(UiSignal::ProjectSaved);
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::dispatch::UiDispatcher;
use crate::event::{SignalKind, UiSignal};

/// Identifier of one subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A boxed listener.
type Listener = Arc<dyn Fn(&UiSignal) + Send + Sync>;

struct ListenerEntry {
    id: SubscriptionId,
    /// `None` subscribes to every signal.
    kind: Option<SignalKind>,
    slot: Listener,
}

struct BusInner {
    dispatcher: Arc<UiDispatcher>,
    /// Listeners in registration order.
    listeners: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

/// Typed signal bus with UI-thread delivery.
///
/// Cheap to clone; clones share the same subscriber list.
#[derive(Clone)]
pub struct UiEventBus {
    inner: Arc<BusInner>,
}

impl UiEventBus {
    /// Create a bus that delivers through the given dispatcher.
    pub fn new(dispatcher: Arc<UiDispatcher>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                dispatcher,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to one signal kind.
    pub fn subscribe<F>(&self, kind: SignalKind, listener: F) -> SubscriptionId
    where
        F: Fn(&UiSignal) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Subscribe to every signal.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&UiSignal) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Subscribe with automatic unsubscription when the guard is dropped.
    pub fn subscribe_scoped<F>(&self, kind: SignalKind, listener: F) -> SubscriptionGuard
    where
        F: Fn(&UiSignal) + Send + Sync + 'static,
    {
        let id = self.subscribe(kind, listener);
        SubscriptionGuard {
            bus: self.clone(),
            id,
        }
    }

    /// Remove a subscription.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Emit a signal.
    ///
    /// Delivered inline when called on the UI thread, otherwise queued on
    /// the dispatcher. Emission order is preserved either way.
    pub fn emit(&self, signal: UiSignal) {
        tracing::trace!(target: "romforge_core::bus", signal = ?signal, "emit");
        if self.inner.dispatcher.is_ui_thread() {
            self.deliver(&signal);
        } else {
            let bus = self.clone();
            self.inner.dispatcher.post(move || {
                bus.deliver(&signal);
            });
        }
    }

    fn register(&self, kind: Option<SignalKind>, slot: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .push(ListenerEntry { id, kind, slot });
        id
    }

    fn deliver(&self, signal: &UiSignal) {
        // Snapshot under the lock, invoke outside it, so listeners can
        // subscribe or unsubscribe without deadlocking.
        let slots: Vec<Listener> = {
            let listeners = self.inner.listeners.lock();
            listeners
                .iter()
                .filter(|entry| entry.kind.is_none_or(|kind| kind == signal.kind()))
                .map(|entry| entry.slot.clone())
                .collect()
        };

        for slot in slots {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| slot(signal)));
            if let Err(payload) = outcome {
                let message = crate::runner::panic_message(payload.as_ref());
                tracing::error!(
                    target: "romforge_core::bus",
                    signal = ?signal,
                    message,
                    "signal listener panicked"
                );
            }
        }
    }
}

/// RAII subscription that unsubscribes when dropped.
pub struct SubscriptionGuard {
    bus: UiEventBus,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

static_assertions::assert_impl_all!(UiEventBus: Send, Sync);
