//! Collapsing per-key change logs.
//!
//! A producer publishes raw `Add`/`Modify`/`Delete` events on a
//! [`ChangeLog`]. Each [`Observer`] subscribed to the log keeps its own
//! pending map and folds every new event into it, so a poll yields at most
//! one net event per key regardless of how many raw events arrived. Dropping
//! an observer unsubscribes it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of change reported for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Add,
    Modify,
    Delete,
}

impl EventType {
    /// Folds `next` onto the pending event for a key.
    ///
    /// Returns `None` when the two cancel out (an add that was deleted again
    /// before anybody looked).
    pub fn fold(pending: Option<EventType>, next: EventType) -> Option<EventType> {
        use EventType::*;

        match (pending, next) {
            (None, e) => Some(e),
            (Some(Add), Add | Modify) => Some(Add),
            (Some(Add), Delete) => None,
            (Some(Modify), Add | Modify) => Some(Modify),
            (Some(Modify), Delete) => Some(Delete),
            (Some(Delete), Add | Modify) => Some(Modify),
            (Some(Delete), Delete) => Some(Delete),
        }
    }
}

struct LogInner<K> {
    next_slot: u64,
    pending: BTreeMap<u64, BTreeMap<K, EventType>>,
}

fn lock<K>(inner: &Mutex<LogInner<K>>) -> MutexGuard<'_, LogInner<K>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of a change log. Cloning shares the log.
pub struct ChangeLog<K> {
    inner: Arc<Mutex<LogInner<K>>>,
}

impl<K> Clone for ChangeLog<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Ord + Clone> Default for ChangeLog<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> ChangeLog<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                next_slot: 0,
                pending: BTreeMap::new(),
            })),
        }
    }

    /// Registers a new observer. It only sees events published from now on.
    pub fn subscribe(&self) -> Observer<K> {
        let mut inner = lock(&self.inner);
        let slot = inner.next_slot;
        inner.next_slot += 1;
        inner.pending.insert(slot, BTreeMap::new());
        Observer {
            inner: Arc::clone(&self.inner),
            slot,
        }
    }

    /// Records an event for `key` with every observer.
    pub fn publish(&self, key: K, event: EventType) {
        let mut inner = lock(&self.inner);
        for pending in inner.pending.values_mut() {
            match EventType::fold(pending.get(&key).copied(), event) {
                Some(net) => {
                    pending.insert(key.clone(), net);
                }
                None => {
                    pending.remove(&key);
                }
            }
        }
    }
}

/// Consumer side of a change log.
pub struct Observer<K> {
    inner: Arc<Mutex<LogInner<K>>>,
    slot: u64,
}

impl<K: Ord + Clone> Observer<K> {
    /// Takes every pending net event, in key order.
    pub fn drain(&self) -> BTreeMap<K, EventType> {
        let mut inner = lock(&self.inner);
        inner
            .pending
            .get_mut(&self.slot)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn has_pending(&self) -> bool {
        let inner = lock(&self.inner);
        inner.pending.get(&self.slot).is_some_and(|p| !p.is_empty())
    }

    pub fn pending_count(&self) -> usize {
        let inner = lock(&self.inner);
        inner.pending.get(&self.slot).map_or(0, |p| p.len())
    }
}

impl<K> Drop for Observer<K> {
    fn drop(&mut self) {
        lock(&self.inner).pending.remove(&self.slot);
    }
}
