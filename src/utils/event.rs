//! A manually-reset signalling flag for coordinating worker threads.
//!
//! Semantics match the classic "event" primitive: `set` latches the flag and
//! wakes every waiter, `clear` re-arms it, and waits observe the flag without
//! consuming it. All worker suspension points in this crate are either a
//! queue wait, an I/O read, or a wait on one of these.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Manually-reset event flag.
#[derive(Default)]
pub struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag and wake all waiters.
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Re-arm the flag. Waiters already woken are unaffected.
    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Wait until the flag is set or `timeout` elapses.
    ///
    /// Returns `true` if the flag was set (possibly before the call), `false`
    /// on timeout. Does not clear the flag.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                return *flag;
            }
        }
        true
    }

    /// Wait with no deadline until the flag is set. Does not clear the flag.
    pub fn wait_until_set(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
    }
}
