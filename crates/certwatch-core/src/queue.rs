//! Thread-safe FIFO of pending package events.
//!
//! Any thread may push; only the worker pops. `push` never fails and gives
//! the natural backpressure point: new notifications keep landing here while
//! the worker is busy with a verification pass. Waking the worker is the
//! caller's job — the queue itself only stores.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::event::Event;

#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
    }

    /// Non-blocking FIFO pop; `None` when empty.
    pub fn pop(&self) -> Option<Event> {
        self.lock().pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        // A poisoned queue lock means a producer panicked mid-push; the
        // queue content itself is still a valid VecDeque.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
