//! Priority-ordered event broadcaster.
//!
//! # Layout
//!
//! Subscribers live in buckets keyed by priority inside a `BTreeMap`, so
//! iterating the map visits buckets in ascending priority. Inside a bucket,
//! subscribers keep their subscription order.
//!
//! # Emission
//!
//! `emit` copies the ordered callback list out of the lock before invoking
//! anything. Callbacks are therefore free to subscribe, unsubscribe, or emit
//! again (on this or any other event) without deadlocking.
//!
//! One-off subscribers are claimed right before they are invoked, which keeps
//! a nested emission from invoking the same one-off twice. Claimed one-offs are
//! removed from the tables by a drop guard once the emission finishes, so a
//! panicking callback still leaves the tables consistent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::subscriber::{priority_in_range, SubscriberId, DEFAULT_PRIORITY};
use crate::error::EventError;

/// Shared callback type stored by an [`Event`].
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: SubscriberId,
    callback: Callback<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

struct Slots<T> {
    buckets: BTreeMap<i8, Vec<Slot<T>>>,
    priorities: HashMap<SubscriberId, i8>,
    one_offs: HashSet<SubscriberId>,
}

impl<T> Slots<T> {
    fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            priorities: HashMap::new(),
            one_offs: HashSet::new(),
        }
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let Some(priority) = self.priorities.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&priority) {
            bucket.retain(|slot| slot.id != id);
            if bucket.is_empty() {
                self.buckets.remove(&priority);
            }
        }
        self.one_offs.remove(&id);
        true
    }
}

/// A multi-subscriber notification with priorities.
///
/// The lower the priority, the earlier the callback runs. Priorities range
/// from -5 to 10; negative values are meant for framework observers that must
/// see a change before user code does.
///
/// # Example
///
/// ```rust
/// use rivulet_core::event::Event;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let event = Event::<usize>::new();
/// let total = Arc::new(AtomicUsize::new(0));
/// let sink = total.clone();
/// event.subscribe(move |n| { sink.fetch_add(*n, Ordering::SeqCst); }, 0).unwrap();
///
/// event.emit(&3);
/// assert_eq!(total.load(Ordering::SeqCst), 3);
/// ```
pub struct Event<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Event<T> {
    /// Create an event with no subscribers.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::new()),
        }
    }

    /// Register `callback` at `priority`.
    pub fn subscribe<F>(&self, callback: F, priority: i8) -> Result<SubscriberId, EventError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_with(Arc::new(callback), priority, false)
    }

    /// Register `callback` at `priority`, removing it after the first emission
    /// that invokes it.
    pub fn subscribe_one_off<F>(&self, callback: F, priority: i8) -> Result<SubscriberId, EventError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_with(Arc::new(callback), priority, true)
    }

    /// Register a shared callback.
    ///
    /// The same `Arc` may only be registered once per event; a second attempt
    /// fails with [`EventError::AlreadySubscribed`].
    pub fn subscribe_with(
        &self,
        callback: Callback<T>,
        priority: i8,
        one_off: bool,
    ) -> Result<SubscriberId, EventError> {
        if !priority_in_range(priority) {
            return Err(EventError::PriorityOutOfRange(priority));
        }

        let mut slots = self.slots.lock();
        let duplicate = slots
            .buckets
            .values()
            .flatten()
            .any(|slot| Arc::ptr_eq(&slot.callback, &callback));
        if duplicate {
            return Err(EventError::AlreadySubscribed);
        }

        let id = SubscriberId::next();
        slots
            .buckets
            .entry(priority)
            .or_default()
            .push(Slot { id, callback });
        slots.priorities.insert(id, priority);
        if one_off {
            slots.one_offs.insert(id);
        }
        Ok(id)
    }

    /// Register a callback at [`DEFAULT_PRIORITY`].
    pub fn connect<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        // A fresh Arc can't be a duplicate and the default priority is in range.
        let mut slots = self.slots.lock();
        let id = SubscriberId::next();
        slots
            .buckets
            .entry(DEFAULT_PRIORITY)
            .or_default()
            .push(Slot {
                id,
                callback: Arc::new(callback),
            });
        slots.priorities.insert(id, DEFAULT_PRIORITY);
        id
    }

    /// Remove a subscription. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.slots.lock().remove(id)
    }

    /// Invoke every subscriber in ascending priority order.
    pub fn emit(&self, args: &T) {
        let (ordered, one_offs): (Vec<Slot<T>>, HashSet<SubscriberId>) = {
            let slots = self.slots.lock();
            let ordered = slots.buckets.values().flatten().cloned().collect();
            (ordered, slots.one_offs.clone())
        };
        if ordered.is_empty() {
            return;
        }

        let mut guard = OneOffGuard {
            event: self,
            claimed: Vec::new(),
        };

        for slot in ordered {
            if one_offs.contains(&slot.id) {
                // Claim it; a nested emission may already have fired it.
                if !self.slots.lock().one_offs.remove(&slot.id) {
                    continue;
                }
                guard.claimed.push(slot.id);
            } else if !self.contains(slot.id) {
                // Unsubscribed by an earlier callback of this emission.
                continue;
            }
            (slot.callback)(args);
        }
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        *self.slots.lock() = Slots::new();
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.slots.lock().priorities.len()
    }

    /// `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is currently subscribed.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.slots.lock().priorities.contains_key(&id)
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Removes claimed one-off subscribers when an emission ends, including
/// when a callback unwinds.
struct OneOffGuard<'a, T> {
    event: &'a Event<T>,
    claimed: Vec<SubscriberId>,
}

impl<T> Drop for OneOffGuard<'_, T> {
    fn drop(&mut self) {
        if self.claimed.is_empty() {
            return;
        }
        let mut slots = self.event.slots.lock();
        for id in self.claimed.drain(..) {
            slots.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn Fn(&()) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &'static str| {
            let sink = sink.clone();
            Box::new(move |_: &()| sink.lock().push(tag)) as Box<dyn Fn(&()) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn fires_in_priority_order() {
        let event = Event::<()>::new();
        let (log, make) = recorder();

        event.subscribe(make("late"), 10).unwrap();
        event.subscribe(make("user"), 0).unwrap();
        event.subscribe(make("internal"), -5).unwrap();
        event.subscribe(make("user2"), 0).unwrap();

        event.emit(&());
        assert_eq!(*log.lock(), vec!["internal", "user", "user2", "late"]);
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let event = Event::<()>::new();
        assert_eq!(
            event.subscribe(|_| {}, 11).unwrap_err(),
            EventError::PriorityOutOfRange(11)
        );
        assert_eq!(
            event.subscribe(|_| {}, -6).unwrap_err(),
            EventError::PriorityOutOfRange(-6)
        );
        assert!(event.is_empty());
    }

    #[test]
    fn rejects_duplicate_callback() {
        let event = Event::<()>::new();
        let callback: Callback<()> = Arc::new(|_| {});
        event.subscribe_with(callback.clone(), 0, false).unwrap();
        assert_eq!(
            event.subscribe_with(callback, 3, false).unwrap_err(),
            EventError::AlreadySubscribed
        );
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn one_off_runs_once() {
        let event = Event::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        event
            .subscribe_one_off(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }, 0)
            .unwrap();

        event.emit(&());
        event.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(event.is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let event = Event::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = event.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        event.emit(&1);
        assert!(event.unsubscribe(id));
        assert!(!event.unsubscribe(id));
        event.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_during_emission_is_skipped() {
        let event = Arc::new(Event::<()>::new());
        let (log, make) = recorder();
        let later = Arc::new(Mutex::new(None));

        let (inner, target) = (event.clone(), later.clone());
        event
            .subscribe(move |_| {
                if let Some(id) = target.lock().take() {
                    inner.unsubscribe(id);
                }
            }, -1)
            .unwrap();
        let id = event.subscribe(make("removed"), 2).unwrap();
        *later.lock() = Some(id);
        event.subscribe(make("kept"), 3).unwrap();

        event.emit(&());
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn reentrant_emit_is_supported() {
        let event = Arc::new(Event::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = event.clone();
        let s = seen.clone();
        event
            .subscribe(move |depth| {
                s.lock().push(*depth);
                if *depth < 3 {
                    inner.emit(&(depth + 1));
                }
            }, 0)
            .unwrap();

        event.emit(&0);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn nested_emission_does_not_refire_one_off() {
        let event = Arc::new(Event::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = event.clone();
        event
            .subscribe(move |depth| {
                if *depth == 0 {
                    inner.emit(&1);
                }
            }, -1)
            .unwrap();
        let c = count.clone();
        event
            .subscribe_one_off(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }, 5)
            .unwrap();

        event.emit(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn panicking_one_off_is_still_removed() {
        let event = Event::<()>::new();
        event.subscribe_one_off(|_| panic!("boom"), 0).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        event
            .subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }, 1)
            .unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| event.emit(&())));
        assert!(result.is_err());
        assert_eq!(event.len(), 1);

        event.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
