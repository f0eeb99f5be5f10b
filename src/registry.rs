//! Listener registry — event name to ordered listener entries.
//!
//! DESIGN
//! ======
//! The registry is plain data owned behind its owner's mutex. Dispatch is
//! split in two phases so no lock is held while user code runs:
//! 1. [`ListenerRegistry::take_dispatch`] snapshots the listeners for an
//!    event and drops one-shot entries, under the lock.
//! 2. [`invoke_all`] runs the snapshot in insertion order, outside the lock.
//!
//! Listeners may therefore subscribe, unsubscribe or emit from inside a
//! dispatch without deadlocking, and a one-shot entry can never fire twice.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::event::EventName;

/// Shared handle to a listener closure. Equality is pointer identity, so the
/// handle returned by `on`/`once` is what `off` matches against.
pub struct Listener<A>(Arc<dyn Fn(A) + Send + Sync>);

impl<A> Listener<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, args: A) {
        (self.0)(args);
    }
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<A> PartialEq for Listener<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<A> Eq for Listener<A> {}

impl<A> fmt::Debug for Listener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

struct ListenerEntry<A> {
    listener: Listener<A>,
    once: bool,
}

pub struct ListenerRegistry<A> {
    events: HashMap<EventName, Vec<ListenerEntry<A>>>,
}

impl<A> ListenerRegistry<A> {
    #[must_use]
    pub fn new() -> Self {
        Self { events: HashMap::new() }
    }

    /// Append a persistent listener.
    pub fn on(&mut self, event: EventName, listener: Listener<A>) {
        self.push(event, listener, false);
    }

    /// Append a listener removed on its first dispatch.
    pub fn once(&mut self, event: EventName, listener: Listener<A>) {
        self.push(event, listener, true);
    }

    fn push(&mut self, event: EventName, listener: Listener<A>, once: bool) {
        self.events
            .entry(event)
            .or_default()
            .push(ListenerEntry { listener, once });
    }

    /// Remove every entry for `event` holding `listener`, or every entry for
    /// `event` when `listener` is `None`. Returns the number removed.
    pub fn off(&mut self, event: &str, listener: Option<&Listener<A>>) -> usize {
        let Some(listener) = listener else {
            return self.remove_event(event);
        };
        let Some(entries) = self.events.get_mut(event) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|entry| entry.listener != *listener);
        let removed = before - entries.len();
        if entries.is_empty() {
            self.events.remove(event);
        }
        removed
    }

    /// Clear one event's listeners, or all of them when `event` is `None`.
    pub fn remove_all(&mut self, event: Option<&str>) -> usize {
        match event {
            Some(event) => self.remove_event(event),
            None => {
                let removed = self.events.values().map(Vec::len).sum();
                self.events.clear();
                removed
            }
        }
    }

    fn remove_event(&mut self, event: &str) -> usize {
        self.events.remove(event).map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.events.get(event).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(EventName::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Snapshot the listeners registered for `event` and drop its one-shot
    /// entries. Returns an empty list for unknown events.
    pub fn take_dispatch(&mut self, event: &str) -> Vec<Listener<A>> {
        let Some(entries) = self.events.get_mut(event) else {
            return Vec::new();
        };
        let snapshot = entries.iter().map(|entry| entry.listener.clone()).collect();
        entries.retain(|entry| !entry.once);
        if entries.is_empty() {
            self.events.remove(event);
        }
        snapshot
    }
}

impl<A> Default for ListenerRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a dispatch snapshot in order. A panicking listener is logged and
/// skipped; the rest still run. Returns how many listeners completed.
pub fn invoke_all<A: Clone>(event: &str, listeners: Vec<Listener<A>>, args: &A) -> usize {
    let mut completed = 0;
    for listener in listeners {
        if isolate(event, || listener.call(args.clone())) {
            completed += 1;
        }
    }
    completed
}

/// Run user code for `event`, containing any panic. Returns `false` if it panicked.
pub(crate) fn isolate(event: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            error!(event, %message, "listener panicked");
            false
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
