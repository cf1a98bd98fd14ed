// Licensed under the Apache-2.0 license

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting or binary semaphore with timed waits.
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
    max: usize,
}

impl Semaphore {
    /// Binary semaphore, initially empty.
    pub fn binary() -> Self {
        Self::with_limit(0, 1)
    }

    /// Binary semaphore, initially available. Used as a lock.
    pub fn binary_full() -> Self {
        Self::with_limit(1, 1)
    }

    pub fn counting() -> Self {
        Self::with_limit(0, usize::MAX)
    }

    fn with_limit(initial: usize, max: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
            max,
        }
    }

    pub fn give(&self) {
        let mut count = self.count.lock().unwrap();
        if *count < self.max {
            *count += 1;
        }
        self.cond.notify_one();
    }

    /// Waits for the semaphore; `None` waits forever. Returns false on
    /// timeout.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        let mut count = self.count.lock().unwrap();
        match timeout {
            None => {
                while *count == 0 {
                    count = self.cond.wait(count).unwrap();
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while *count == 0 {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    count = self.cond.wait_timeout(count, deadline - now).unwrap().0;
                }
            }
        }
        *count -= 1;
        true
    }

    /// Takes the semaphore if it is available without waiting.
    pub fn try_take(&self) -> bool {
        self.take(Some(Duration::ZERO))
    }

    /// Drops any pending gives.
    pub fn clear(&self) {
        *self.count.lock().unwrap() = 0;
    }

    /// Takes a `binary_full` semaphore and returns a guard that gives it
    /// back on drop.
    pub fn lock(&self, timeout: Option<Duration>) -> Option<SemaphoreGuard<'_>> {
        self.take(timeout).then_some(SemaphoreGuard { sem: self })
    }
}

pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.give();
    }
}
