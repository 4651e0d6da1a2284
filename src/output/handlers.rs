//! Callback subscriptions
//!
//! Handlers are called outside the lock, so a handler may subscribe or
//! unsubscribe without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Shared callback type
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Inner<T> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, Handler<T>)>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T> Detach for Inner<T> {
    fn detach(&self, id: u64) {
        self.handlers.write().retain(|(handler_id, _)| *handler_id != id);
    }
}

/// A set of subscribed callbacks
///
/// Cloning yields another handle to the same set.
pub struct HandlerSet<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for HandlerSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for HandlerSet<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                handlers: RwLock::new(Vec::new()),
            }),
        }
    }
}

impl<T: 'static> HandlerSet<T> {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().push((id, Arc::new(handler)));

        let set: Weak<dyn Detach> = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
        Subscription { id, set }
    }

    /// Call every handler once with `value`
    pub fn emit(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(value);
        }
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }

    /// Number of subscribed handlers
    pub fn len(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Whether no handler is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`
///
/// Dropping it keeps the handler subscribed; call [`Subscription::unsubscribe`]
/// to remove it.
pub struct Subscription {
    id: u64,
    set: Weak<dyn Detach>,
}

impl Subscription {
    /// Remove the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_every_handler() {
        let set = HandlerSet::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            set.subscribe(move |value| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        set.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let set = HandlerSet::<()>::new();
        let first = set.subscribe(|_| {});
        let _second = set.subscribe(|_| {});

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = HandlerSet::<()>::new();
        let subscription = set.subscribe(|_| {});
        drop(set);
        subscription.unsubscribe();
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let set = HandlerSet::<()>::new();
        let slot: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_clone = slot.clone();
        let calls_clone = calls.clone();
        let subscription = set.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = slot_clone.lock().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.lock() = Some(subscription);

        set.emit(&());
        set.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }
}
