//! Observable Value
//!
//! A minimal single-threaded publish/subscribe cell. `next` replaces the
//! current value and synchronously notifies every subscriber, in
//! subscription order, unless the emitter's equality check reports that
//! nothing changed.
//!
//! No borrow is held while listeners run, so a listener may freely call
//! back into the emitter (or anything that owns one). A `next` issued from
//! inside a listener is queued and delivered once the current pass ends;
//! every listener sees every value in the order `next` was called.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

/// Listener callback: `(current, previous)`.
pub type Listener<T> = Rc<dyn Fn(&T, &T)>;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

enum Delivery<T> {
    Idle,
    /// A pass is running; values published meanwhile wait here.
    Delivering(VecDeque<T>),
}

struct Shared<T> {
    curr: RefCell<T>,
    prev: RefCell<T>,
    listeners: RefCell<BTreeMap<u64, Listener<T>>>,
    next_id: Cell<u64>,
    is_equal: Option<Equality<T>>,
    delivery: RefCell<Delivery<T>>,
}

/// Returns the emitter to `Idle` even if a listener unwinds.
struct DeliveryGuard<'a, T>(&'a Shared<T>);

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        *self.0.delivery.borrow_mut() = Delivery::Idle;
    }
}

impl<T: Clone + 'static> Shared<T> {
    fn subscribe(self: &Rc<Self>, listener: Listener<T>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().insert(id, listener);

        let weak: Weak<Self> = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.listeners.borrow_mut().remove(&id);
            }
        })
    }
}

/// Handle returned by `subscribe`.
///
/// The listener stays registered for as long as the handle lives; dropping
/// it (or calling [`Subscription::unsubscribe`]) removes the listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Writable observable value.
pub struct Emitter<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Emitter<T> {
    /// Emitter that skips notification when `PartialEq` reports no change.
    pub fn new(initial: T) -> Self {
        Self::build(initial, Some(Box::new(|a: &T, b: &T| a == b)))
    }
}

impl<T: Clone + 'static> Emitter<T> {
    /// Emitter with a custom equality check.
    pub fn with_equality(initial: T, is_equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::build(initial, Some(Box::new(is_equal)))
    }

    /// Emitter that notifies on every `next`.
    pub fn unfiltered(initial: T) -> Self {
        Self::build(initial, None)
    }

    fn build(initial: T, is_equal: Option<Equality<T>>) -> Self {
        Self {
            shared: Rc::new(Shared {
                curr: RefCell::new(initial.clone()),
                prev: RefCell::new(initial),
                listeners: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(0),
                is_equal,
                delivery: RefCell::new(Delivery::Idle),
            }),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> Subscription {
        self.shared.subscribe(Rc::new(listener))
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.shared.curr.borrow().clone()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.borrow().len()
    }

    /// Publish a new value.
    ///
    /// The previous value is always updated, even when the equality check
    /// suppresses notification. Listeners removed during delivery are
    /// skipped; listeners added during delivery first hear the next value.
    ///
    /// Called from inside a listener, the value is queued behind the pass
    /// in progress and `get` keeps returning the value being delivered
    /// until its turn comes.
    pub fn next(&self, value: T) {
        {
            let mut delivery = self.shared.delivery.borrow_mut();
            match &mut *delivery {
                Delivery::Delivering(queued) => {
                    queued.push_back(value);
                    return;
                }
                Delivery::Idle => *delivery = Delivery::Delivering(VecDeque::new()),
            }
        }

        let _guard = DeliveryGuard(&*self.shared);
        let mut value = value;
        loop {
            self.publish(value);

            let queued = match &mut *self.shared.delivery.borrow_mut() {
                Delivery::Delivering(queued) => queued.pop_front(),
                Delivery::Idle => None,
            };
            match queued {
                Some(v) => value = v,
                None => break,
            }
        }
    }

    fn publish(&self, value: T) {
        let old = self.shared.curr.replace(value);
        *self.shared.prev.borrow_mut() = old;

        let curr = self.shared.curr.borrow().clone();
        let prev = self.shared.prev.borrow().clone();

        if let Some(is_equal) = &self.shared.is_equal {
            if is_equal(&curr, &prev) {
                return;
            }
        }

        let listeners: Vec<(u64, Listener<T>)> = self
            .shared
            .listeners
            .borrow()
            .iter()
            .map(|(id, l)| (*id, Rc::clone(l)))
            .collect();

        for (id, listener) in listeners {
            if !self.shared.listeners.borrow().contains_key(&id) {
                continue;
            }
            listener(&curr, &prev);
        }
    }

    /// Subscribe/get-only view.
    pub fn read_only(&self) -> ReadOnlyEmitter<T> {
        ReadOnlyEmitter {
            inner: self.clone(),
        }
    }
}

/// Read-only view of an [`Emitter`].
pub struct ReadOnlyEmitter<T> {
    inner: Emitter<T>,
}

impl<T> Clone for ReadOnlyEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> ReadOnlyEmitter<T> {
    /// Register a listener.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> Subscription {
        self.inner.subscribe(listener)
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.get()
    }
}

/// Subscribe to a projection of `source`.
///
/// `listener` receives `(selected current, selected previous)` whenever the
/// projection changes under `PartialEq`, and always on the first
/// notification delivered after subscribing.
pub fn with_selector<T, U>(
    source: &ReadOnlyEmitter<T>,
    selector: impl Fn(&T) -> U + 'static,
    listener: impl Fn(&U, &U) + 'static,
) -> Subscription
where
    T: Clone + 'static,
    U: PartialEq + 'static,
{
    let first = Cell::new(true);
    source.subscribe(move |curr, prev| {
        let selected_curr = selector(curr);
        let selected_prev = selector(prev);

        if first.get() || selected_curr != selected_prev {
            first.set(false);
            listener(&selected_curr, &selected_prev);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<(T, T)>>>, impl Fn(&T, &T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |c: &T, p: &T| sink.borrow_mut().push((c.clone(), p.clone())))
    }

    #[test]
    fn test_get_without_side_effects() {
        let emitter = Emitter::new(1);
        let (log, listener) = recorder::<i32>();
        let _sub = emitter.subscribe(listener);

        assert_eq!(emitter.get(), 1);
        assert_eq!(emitter.get(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_next_notifies_with_prev() {
        let emitter = Emitter::new(1);
        let (log, listener) = recorder::<i32>();
        let _sub = emitter.subscribe(listener);

        emitter.next(2);
        emitter.next(3);

        assert_eq!(*log.borrow(), vec![(2, 1), (3, 2)]);
        assert_eq!(emitter.get(), 3);
    }

    #[test]
    fn test_equal_value_not_notified() {
        let emitter = Emitter::new(5);
        let (log, listener) = recorder::<i32>();
        let _sub = emitter.subscribe(listener);

        emitter.next(5);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_custom_equality() {
        // Only the parity matters
        let emitter = Emitter::with_equality(0, |a: &i32, b: &i32| a % 2 == b % 2);
        let (log, listener) = recorder::<i32>();
        let _sub = emitter.subscribe(listener);

        emitter.next(2);
        emitter.next(3);
        assert_eq!(*log.borrow(), vec![(3, 2)]);
    }

    #[test]
    fn test_unfiltered_always_notifies() {
        let emitter = Emitter::unfiltered(1);
        let (log, listener) = recorder::<i32>();
        let _sub = emitter.subscribe(listener);

        emitter.next(1);
        emitter.next(1);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_subscription_order() {
        let emitter = Emitter::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Rc::clone(&order);
                emitter.subscribe(move |_, _| order.borrow_mut().push(i))
            })
            .collect();

        emitter.next(1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_unsubscribe() {
        let emitter = Emitter::new(0);
        let (log, listener) = recorder::<i32>();
        let sub = emitter.subscribe(listener);

        emitter.next(1);
        sub.unsubscribe();
        emitter.next(2);

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_reenter() {
        let emitter = Emitter::new(0);
        let inner = emitter.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);

        let _sub = emitter.subscribe(move |curr, _| {
            seen_in.borrow_mut().push(*curr);
            if *curr < 3 {
                inner.next(curr + 1);
            }
        });

        emitter.next(1);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(emitter.get(), 3);
    }

    #[test]
    fn test_reentrant_next_keeps_call_order() {
        let emitter = Emitter::new(0);
        let inner = emitter.clone();

        // First listener republishes while 1 is still being delivered.
        let _bump = emitter.subscribe(move |curr, _| {
            if *curr == 1 {
                inner.next(2);
            }
        });
        let (log, listener) = recorder::<i32>();
        let _watch = emitter.subscribe(listener);

        let during = Rc::new(RefCell::new(Vec::new()));
        let d = Rc::clone(&during);
        let view = emitter.read_only();
        let _peek = emitter.subscribe(move |_, _| d.borrow_mut().push(view.get()));

        emitter.next(1);

        assert_eq!(*log.borrow(), vec![(1, 0), (2, 1)]);
        assert_eq!(*during.borrow(), vec![1, 2]);
        assert_eq!(log.borrow().last().map(|(c, _)| *c), Some(emitter.get()));
        assert_eq!(emitter.get(), 2);
    }

    #[test]
    fn test_queued_values_still_filtered() {
        let emitter = Emitter::new(0);
        let inner = emitter.clone();
        let _sub = emitter.subscribe(move |curr, _| {
            if *curr == 1 {
                // Second push repeats the first; only one is delivered.
                inner.next(2);
                inner.next(2);
            }
        });
        let (log, listener) = recorder::<i32>();
        let _watch = emitter.subscribe(listener);

        emitter.next(1);
        assert_eq!(*log.borrow(), vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_dropping_subscription_removes_listener() {
        let emitter = Emitter::new(0);
        let (log, listener) = recorder::<i32>();
        let sub = emitter.subscribe(listener);
        assert_eq!(emitter.listener_count(), 1);

        drop(sub);
        emitter.next(1);
        assert!(log.borrow().is_empty());
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_with_selector_fires_first_regardless() {
        let emitter = Emitter::unfiltered((1, "a"));
        let (log, listener) = recorder::<i32>();
        let _sub = with_selector(&emitter.read_only(), |v| v.0, listener);

        // Selected value unchanged, but first notification always fires.
        emitter.next((1, "b"));
        assert_eq!(*log.borrow(), vec![(1, 1)]);

        // Unchanged projection is filtered afterwards.
        emitter.next((1, "c"));
        assert_eq!(log.borrow().len(), 1);

        emitter.next((2, "c"));
        assert_eq!(*log.borrow(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn test_read_only_view_shares_state() {
        let emitter = Emitter::new(10);
        let view = emitter.read_only();
        emitter.next(11);
        assert_eq!(view.get(), 11);
    }
}
