//! One-shot countdown signals used to sequence the rendezvous.
//!
//! A [`Latch`] starts unsignaled and flips to signaled exactly once.  It
//! never resets: later `signal()` calls are no-ops and every later wait
//! returns immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Countdown signal with a count of one.
#[derive(Debug, Default)]
pub struct Latch {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the latch as signaled and wake every waiter.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            *signaled = true;
            self.cond.notify_all();
        }
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until the latch is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the latch was signaled.  A timeout is not an error;
    /// the caller proceeds either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        *signaled
    }
}

/// The three signals of one rendezvous run.
#[derive(Debug, Clone, Default)]
pub struct RendezvousSignals {
    /// The probe statement has executed in the holder's transaction.
    pub probe_done: Arc<Latch>,
    /// The coordinator has released the holder; its transaction may commit.
    pub holder_finished: Arc<Latch>,
    /// The second worker's conflicting update has returned.
    pub second_finished: Arc<Latch>,
}

impl RendezvousSignals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
