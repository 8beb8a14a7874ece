//! Append-only label log shared by the rendezvous participants.
//!
//! The log is a passive recorder: it preserves insertion order and never
//! loses an append, but any ordering between writers comes from the
//! rendezvous signals, not from the log.

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label.  Safe to call from any number of threads.
    pub fn append(&self, label: impl Into<String>) {
        let label = label.into();
        tracing::trace!(label = %label, "event log append");
        self.entries.lock().push(label);
    }

    /// Copy of the labels appended so far, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
