//! Observer utilities used for destruction notifications
//!
//! A [`Signaler`] keeps a list of callbacks. Registering a callback returns a [`SignalToken`],
//! the callback stays registered for as long as the token is alive. Dropping the token
//! unregisters the callback.
//!
//! Sending is re-entrant: callbacks may register new callbacks, drop tokens or send further
//! events on the same signaler. Events sent from within a callback are queued and delivered
//! once the current event has been dispatched to every callback.

use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

type Callback<S> = Weak<RefCell<dyn FnMut(&S)>>;

struct SignalInner<S> {
    callbacks: RefCell<Vec<Callback<S>>>,
    pending_callbacks: RefCell<Vec<Callback<S>>>,
    pending_events: RefCell<VecDeque<S>>,
}

impl<S> SignalInner<S> {
    fn new() -> SignalInner<S> {
        SignalInner {
            callbacks: RefCell::new(Vec::new()),
            pending_callbacks: RefCell::new(Vec::new()),
            pending_events: RefCell::new(VecDeque::new()),
        }
    }

    fn insert(&self, weak: Callback<S>) {
        // if we are currently dispatching, the callback list is borrowed
        match self.callbacks.try_borrow_mut() {
            Ok(mut guard) => guard.push(weak),
            Err(_) => self.pending_callbacks.borrow_mut().push(weak),
        }
    }

    fn send(&self, event: S) {
        self.pending_events.borrow_mut().push_back(event);

        // an outer call already dispatches, it will pick up the queued event
        let Ok(mut guard) = self.callbacks.try_borrow_mut() else {
            return;
        };

        loop {
            guard.extend(self.pending_callbacks.borrow_mut().drain(..));
            guard.retain(|weak| weak.strong_count() > 0);

            let next_event = self.pending_events.borrow_mut().pop_front();
            let Some(event) = next_event else {
                break;
            };
            let callbacks = guard.iter().filter_map(Weak::upgrade).collect::<Vec<_>>();
            for callback in callbacks {
                // a callback invoking itself recursively is skipped
                if let Ok(mut cb) = callback.try_borrow_mut() {
                    (&mut *cb)(&event);
                }
            }
        }
    }
}

/// An event source, to which callbacks can be registered
pub struct Signaler<S> {
    inner: Rc<SignalInner<S>>,
}

impl<S> fmt::Debug for Signaler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signaler")
            .field("callbacks", &self.inner.callbacks.try_borrow().map(|c| c.len()).ok())
            .finish_non_exhaustive()
    }
}

impl<S> Clone for Signaler<S> {
    fn clone(&self) -> Signaler<S> {
        Signaler {
            inner: self.inner.clone(),
        }
    }
}

impl<S: 'static> Default for Signaler<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Signaler<S> {
    /// Create a new signaler without any registered callbacks
    pub fn new() -> Signaler<S> {
        Signaler {
            inner: Rc::new(SignalInner::new()),
        }
    }

    /// Register a callback to this signaler
    ///
    /// The callback is invoked for every event sent, until the returned
    /// [`SignalToken`] is dropped.
    #[must_use = "the callback is unregistered when the token is dropped"]
    pub fn register<F: FnMut(&S) + 'static>(&self, f: F) -> SignalToken {
        let rc = Rc::new(RefCell::new(f));
        let weak = Rc::downgrade(&rc) as Callback<S>;
        self.inner.insert(weak);
        SignalToken { signal: rc }
    }

    /// Send an event to every registered callback
    pub fn signal(&self, event: S) {
        self.inner.send(event);
    }

    /// Number of callbacks currently registered
    pub fn len(&self) -> usize {
        let pending = self
            .inner
            .pending_callbacks
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count();
        let registered = self
            .inner
            .callbacks
            .try_borrow()
            .map(|cbs| cbs.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0);
        pending + registered
    }

    /// Whether no callback is currently registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A token associated with a callback registered to a [`Signaler`]
///
/// Dropping it unregisters the callback.
pub struct SignalToken {
    signal: Rc<dyn Any>,
}

impl fmt::Debug for SignalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalToken").finish_non_exhaustive()
    }
}

impl SignalToken {
    /// Explicitly unregister the associated callback
    pub fn remove(self) {}

    #[cfg(test)]
    fn is_same(&self, other: &SignalToken) -> bool {
        Rc::ptr_eq(&self.signal, &other.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn token_drop_unregisters() {
        let signaler = Signaler::<u32>::new();
        let count = Rc::new(Cell::new(0));

        let count2 = count.clone();
        let token = signaler.register(move |v| count2.set(count2.get() + *v));
        signaler.signal(2);
        assert_eq!(count.get(), 2);
        assert_eq!(signaler.len(), 1);

        drop(token);
        signaler.signal(2);
        assert_eq!(count.get(), 2);
        assert!(signaler.is_empty());
    }

    #[test]
    fn reentrant_send_is_queued() {
        let signaler = Signaler::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen2 = seen.clone();
        let signaler2 = signaler.clone();
        let _token = signaler.register(move |v| {
            seen2.borrow_mut().push(*v);
            if *v == 1 {
                signaler2.signal(2);
                // not yet delivered, the outer dispatch picks it up
                assert_eq!(*seen2.borrow(), vec![1]);
            }
        });

        signaler.signal(1);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn callback_may_drop_other_token() {
        let signaler = Signaler::<()>::new();
        let hits = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<SignalToken>>> = Rc::new(RefCell::new(None));

        let victim2 = victim.clone();
        let _killer = signaler.register(move |_| {
            victim2.borrow_mut().take();
        });
        let hits2 = hits.clone();
        *victim.borrow_mut() = Some(signaler.register(move |_| hits2.set(hits2.get() + 1)));

        // the victim was upgraded before the killer ran, so it still sees this event
        signaler.signal(());
        assert_eq!(hits.get(), 1);
        signaler.signal(());
        assert_eq!(hits.get(), 1);
        assert_eq!(signaler.len(), 1);
    }

    #[test]
    fn register_during_dispatch() {
        let signaler = Signaler::<()>::new();
        let late: Rc<RefCell<Vec<SignalToken>>> = Rc::new(RefCell::new(Vec::new()));
        let late_hits = Rc::new(Cell::new(0));

        let signaler2 = signaler.clone();
        let late2 = late.clone();
        let late_hits2 = late_hits.clone();
        let _token = signaler.register(move |_| {
            let hits = late_hits2.clone();
            late2
                .borrow_mut()
                .push(signaler2.register(move |_| hits.set(hits.get() + 1)));
        });

        signaler.signal(());
        assert_eq!(late_hits.get(), 0);
        signaler.signal(());
        assert_eq!(late_hits.get(), 1);
        let tokens = late.borrow();
        assert!(!tokens[0].is_same(&tokens[1]));
    }
}
