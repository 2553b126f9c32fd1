//! Observer registry.
//!
//! Callbacks run synchronously, in subscription order, every time a value
//! is published.

use std::{fmt, sync::Arc};

/// Unique identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

impl ObserverId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Type-erased observer function.
pub(crate) type ObserverFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscribers to one kind of event.
pub struct Observers<E> {
    observers: Vec<(ObserverId, ObserverFn<E>)>,
    next_id: u32,
}

impl<E> Observers<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 0,
        }
    }

    /// Register `callback`. The returned id removes it again.
    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    /// Deliver `event` to every observer.
    pub fn notify(&self, event: &E) {
        for (_, callback) in &self.observers {
            callback(event);
        }
    }

    /// Current callbacks, for delivery after releasing a lock around `self`.
    pub(crate) fn callbacks(&self) -> Vec<ObserverFn<E>> {
        self.observers
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_notify_and_unsubscribe() {
        let total = Arc::new(AtomicU32::new(0));
        let mut observers = Observers::<u32>::new();

        let counter = Arc::clone(&total);
        let first = observers.subscribe(move |value| {
            counter.fetch_add(*value, Ordering::SeqCst);
        });
        let counter = Arc::clone(&total);
        observers.subscribe(move |value| {
            counter.fetch_add(*value * 10, Ordering::SeqCst);
        });

        observers.notify(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);

        assert!(observers.unsubscribe(first));
        assert!(!observers.unsubscribe(first));
        observers.notify(&1);
        assert_eq!(total.load(Ordering::SeqCst), 32);
        assert_eq!(observers.len(), 1);
    }
}
