//! Countdown latch
//!
//! Starts at a fixed count; `wait()` blocks until the count reaches zero.
//! Used for the started and finished barriers of an episode.

use parking_lot::{Condvar, Mutex};

/// A one-shot countdown barrier
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    /// Create a latch that opens after `count` calls to [`count_down`](Self::count_down)
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrement the count, waking all waiters when it reaches zero.
    ///
    /// Saturates at zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Block until the count reaches zero. Returns immediately if it already has.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Current count
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
