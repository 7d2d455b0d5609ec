use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    id: u64,
    cb: Callback<T>,
    /// Listener is detached once this token (or an ancestor) is cancelled.
    scope: Option<CancellationToken>,
}

struct Inner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<Listener<T>>>,
    next_id: AtomicU64,
}

/// A clonable reference to a shared value with synchronous update
/// notification.
///
/// Cloning is cheap: all clones point at the same value and the same
/// listener set.
pub struct SharedRef<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRef")
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

/// Handle for a listener registered through [`SharedRef::on_update`].
///
/// Dropping the handle does NOT detach the listener; call
/// [`ListenerHandle::remove`] or scope the listener to a cancellation token.
pub struct ListenerHandle {
    id: u64,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl ListenerHandle {
    /// Detach the listener. Idempotent.
    pub fn remove(&self) {
        (self.remove)(self.id);
    }
}

impl<T: Clone + Send + Sync + 'static> SharedRef<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Write a new value and synchronously notify every live listener.
    ///
    /// Listeners whose cancellation scope has been cancelled are purged
    /// before notification. The value lock is released before callbacks run,
    /// so listeners may freely call `get`, `set` or register further
    /// listeners.
    pub fn set(&self, value: T) {
        *self.inner.value.lock() = value.clone();
        let callbacks: Vec<Callback<T>> = {
            let mut listeners = self.inner.listeners.lock();
            listeners.retain(|l| l.scope.as_ref().is_none_or(|t| !t.is_cancelled()));
            listeners.iter().map(|l| Arc::clone(&l.cb)).collect()
        };
        for cb in callbacks {
            cb(&value);
        }
    }

    /// Register a listener called on every subsequent `set`.
    pub fn on_update(&self, cb: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        self.register(Arc::new(cb), None)
    }

    /// Register a listener that is detached once `scope` is cancelled.
    ///
    /// If the token is already cancelled the listener is never registered.
    pub fn on_update_until(
        &self,
        scope: &CancellationToken,
        cb: impl Fn(&T) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.register(Arc::new(cb), Some(scope.clone()))
    }

    fn register(&self, cb: Callback<T>, scope: Option<CancellationToken>) -> ListenerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let already_cancelled = scope.as_ref().is_some_and(CancellationToken::is_cancelled);
        if !already_cancelled {
            self.inner.listeners.lock().push(Listener { id, cb, scope });
        }
        let inner = Arc::downgrade(&self.inner);
        ListenerHandle {
            id,
            remove: Box::new(move |id| {
                if let Some(inner) = inner.upgrade() {
                    inner.listeners.lock().retain(|l| l.id != id);
                }
            }),
        }
    }
}
