//! Callback correlator — locally owned callbacks awaiting a peer reply.
//!
//! DESIGN
//! ======
//! Every callback argument sent out is stored under a fresh [`CallbackId`]
//! together with the event and argument position it travelled in. The peer
//! echoes the id in `reply_to`; [`CallbackCorrelator::resolve`] removes the
//! entry and hands it back so the caller can complete it outside the lock.
//! Removal before completion makes invocation at-most-once.
//!
//! BOUNDS
//! ======
//! - Entries older than `timeout` are evicted by [`CallbackCorrelator::expire_at`]
//!   and completed with [`CallbackError::TimedOut`].
//! - Registration fails once `max_pending` entries are outstanding.
//! - Closing the connection drains every entry with
//!   [`CallbackError::ConnectionClosed`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use frames::CallbackId;

use crate::args::{Args, Callback};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("no reply within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("connection closed before the reply arrived")]
    ConnectionClosed,
    #[error("too many pending callbacks (max {max})")]
    TooManyPending { max: usize },
    #[error("event was not sent")]
    NotSent,
}

/// A callback sent to the peer and not yet resolved.
#[derive(Debug)]
pub struct PendingCallback {
    event: String,
    index: usize,
    callback: Callback,
    registered_at: Instant,
}

impl PendingCallback {
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Consume the entry and invoke its callback. Panics in user code are
    /// contained and logged.
    pub fn complete(self, result: Result<Args, CallbackError>) {
        let event = frames::correlation_event_name(&self.event, self.index);
        let callback = self.callback;
        crate::registry::isolate(&event, move || callback.complete(result));
    }
}

pub struct CallbackCorrelator {
    next_id: CallbackId,
    pending: HashMap<CallbackId, PendingCallback>,
    timeout: Duration,
    max_pending: usize,
}

impl CallbackCorrelator {
    #[must_use]
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self { next_id: 1, pending: HashMap::new(), timeout, max_pending }
    }

    /// Store `callback` for argument `index` of `event` and return its id.
    ///
    /// # Errors
    ///
    /// Hands the callback back with [`CallbackError::TooManyPending`] when
    /// the table is full.
    pub fn register(
        &mut self,
        event: &str,
        index: usize,
        callback: Callback,
    ) -> Result<CallbackId, (Callback, CallbackError)> {
        self.register_at(event, index, callback, Instant::now())
    }

    /// Internal: register with an explicit timestamp (for testing).
    fn register_at(
        &mut self,
        event: &str,
        index: usize,
        callback: Callback,
        now: Instant,
    ) -> Result<CallbackId, (Callback, CallbackError)> {
        if self.pending.len() >= self.max_pending {
            return Err((callback, CallbackError::TooManyPending { max: self.max_pending }));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingCallback { event: event.to_owned(), index, callback, registered_at: now },
        );
        Ok(id)
    }

    /// Remove the entry for `id`. `None` if unknown or already resolved.
    pub fn resolve(&mut self, id: CallbackId) -> Option<PendingCallback> {
        self.pending.remove(&id)
    }

    /// Remove every entry registered at or before `now - timeout`.
    pub fn expire_at(&mut self, now: Instant) -> Vec<PendingCallback> {
        let timeout = self.timeout;
        let expired: Vec<CallbackId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.registered_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        let mut out: Vec<PendingCallback> = expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();
        out.sort_by_key(|p| p.registered_at);
        out
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<PendingCallback> {
        let mut out: Vec<PendingCallback> = self.pending.drain().map(|(_, p)| p).collect();
        out.sort_by_key(|p| p.registered_at);
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
