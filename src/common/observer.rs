//! Synchronous publish/subscribe list
//!
//! Observers are invoked in registration order on the thread that performed
//! the state transition. They must return quickly; long work belongs on a
//! spawned task.

use std::sync::{Arc, RwLock};

/// Registration list of observers for events of type `E`.
pub struct Observable<E: ?Sized> {
    observers: RwLock<Vec<Arc<dyn Fn(&E) + Send + Sync>>>,
}

impl<E: ?Sized> Observable<E> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn Fn(&E) + Send + Sync>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Invoke every observer with `event`.
    ///
    /// The list is cloned before dispatch so an observer may register
    /// further observers without deadlocking.
    pub fn notify(&self, event: &E) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(event);
        }
    }
}

impl<E: ?Sized> Default for Observable<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observable: Observable<u32> = Observable::new();

        let s1 = seen.clone();
        observable.add_observer(Arc::new(move |e: &u32| s1.lock().unwrap().push(("a", *e))));
        let s2 = seen.clone();
        observable.add_observer(Arc::new(move |e: &u32| s2.lock().unwrap().push(("b", *e))));

        observable.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
        assert_eq!(observable.observer_count(), 2);
    }

    #[test]
    fn test_observer_may_register_during_notify() {
        let observable: Arc<Observable<str>> = Arc::new(Observable::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = observable.clone();
        let h = hits.clone();
        observable.add_observer(Arc::new(move |_: &str| {
            h.fetch_add(1, Ordering::SeqCst);
            let h2 = h.clone();
            inner.add_observer(Arc::new(move |_: &str| {
                h2.fetch_add(10, Ordering::SeqCst);
            }));
        }));

        observable.notify("first");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(observable.observer_count(), 2);
    }
}
