//! Synchronous events, disposables, and the teardown registry.
//!
//! Dispatch is synchronous and runs on the caller's thread. The dispatch
//! loop is reentrancy-safe: listeners may subscribe, unsubscribe, fire
//! further events, or apply edits while a `fire` is in progress. No lock is
//! held while a listener callback runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

/// Error value a listener can return to signal failure. Failures never
/// propagate out of `fire`; they are reported through the emitter's
/// failure handler (see [`ListenerFailure`]).
pub type ListenerFault = Box<dyn std::error::Error + Send + Sync>;

pub type ListenerResult = Result<(), ListenerFault>;

/// A failure raised by a subscriber during dispatch, reported out of band
/// while sibling listeners still run.
#[derive(Debug)]
pub struct ListenerFailure {
    /// Label of the event whose listener failed.
    pub event: &'static str,
    pub fault: ListenerFault,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener of '{}' failed: {}", self.event, self.fault)
    }
}

type FaultHandler = Arc<dyn Fn(ListenerFailure) + Send + Sync>;

/// A handle that releases exactly one previously acquired resource or
/// subscription when disposed.
///
/// Disposal is idempotent: the teardown closure runs at most once and
/// further calls are no-ops.
#[derive(Clone)]
pub struct Disposable {
    teardown: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Disposable {
    pub fn new(on_dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Arc::new(Mutex::new(Some(Box::new(on_dispose)))),
        }
    }

    /// Run the teardown closure if it has not run yet.
    pub fn dispose(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct Listener<T> {
    /// Cleared on unsubscribe; checked immediately before each invocation
    /// so removal takes effect even mid-dispatch.
    active: AtomicBool,
    callback: Box<dyn Fn(&T) -> ListenerResult + Send + Sync>,
}

struct EmitterInner<T> {
    label: &'static str,
    listeners: Mutex<Vec<Arc<Listener<T>>>>,
    fault_handler: Option<FaultHandler>,
}

/// A typed subscription point with synchronous dispatch.
///
/// Listeners run in subscription order. `fire` iterates a snapshot taken at
/// dispatch start, so a listener subscribed during a `fire` does not see
/// that in-flight event, while one unsubscribed mid-dispatch is skipped if
/// its turn has not yet come.
pub struct EventEmitter<T> {
    inner: Arc<EmitterInner<T>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("label", &self.inner.label)
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl<T: 'static> EventEmitter<T> {
    /// An emitter whose listener failures are only logged.
    pub fn new(label: &'static str) -> Self {
        Self::build(label, None)
    }

    /// An emitter that forwards listener failures to `handler` (in addition
    /// to logging them).
    pub fn with_fault_handler(
        label: &'static str,
        handler: impl Fn(ListenerFailure) + Send + Sync + 'static,
    ) -> Self {
        Self::build(label, Some(Arc::new(handler)))
    }

    pub(crate) fn with_shared_fault_handler(label: &'static str, handler: FaultHandler) -> Self {
        Self::build(label, Some(handler))
    }

    fn build(label: &'static str, fault_handler: Option<FaultHandler>) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                label,
                listeners: Mutex::new(Vec::new()),
                fault_handler,
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Register a fallible listener; the returned disposable unsubscribes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&T) -> ListenerResult + Send + Sync + 'static,
    ) -> Disposable {
        let entry = Arc::new(Listener {
            active: AtomicBool::new(true),
            callback: Box::new(listener),
        });
        self.inner.listeners.lock().push(Arc::clone(&entry));

        let weak: Weak<EmitterInner<T>> = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            entry.active.store(false, Ordering::SeqCst);
            if let Some(inner) = weak.upgrade() {
                inner
                    .listeners
                    .lock()
                    .retain(|l| !Arc::ptr_eq(l, &entry));
            }
        })
    }

    /// Register an infallible listener.
    pub fn listen(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
        self.subscribe(move |value| {
            listener(value);
            Ok(())
        })
    }

    /// Invoke every currently-registered listener with `value`, in
    /// subscription order. Never fails: a failing listener is isolated and
    /// reported while the remaining listeners still run.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Arc<Listener<T>>> = self.inner.listeners.lock().clone();
        for listener in snapshot {
            if !listener.active.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(fault) = (listener.callback)(value) {
                self.report(fault);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    /// Drop all listeners at once. Outstanding subscription disposables
    /// become no-ops.
    pub fn dispose(&self) {
        let mut listeners = self.inner.listeners.lock();
        for listener in listeners.iter() {
            listener.active.store(false, Ordering::SeqCst);
        }
        listeners.clear();
    }

    fn report(&self, fault: ListenerFault) {
        error!(event = self.inner.label, %fault, "listener failed during dispatch");
        if let Some(handler) = &self.inner.fault_handler {
            handler(ListenerFailure {
                event: self.inner.label,
                fault,
            });
        }
    }
}

/// Ordered collection of disposables, torn down in reverse registration
/// order (the natural order for resource stacks).
#[derive(Debug, Default)]
pub struct DisposableRegistry {
    items: Mutex<Vec<Disposable>>,
}

impl DisposableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, disposable: Disposable) {
        self.items.lock().push(disposable);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Dispose every member in reverse registration order. Members that are
    /// already disposed are tolerated; disposing the registry twice is a
    /// no-op. The lock is released before any teardown runs, so teardown
    /// code may push new disposables without deadlocking.
    pub fn dispose(&self) {
        let items = std::mem::take(&mut *self.items.lock());
        for disposable in items.iter().rev() {
            disposable.dispose();
        }
    }
}
