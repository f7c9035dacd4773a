#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{BitsyError, Result};

/// Guards a value with a sequence counter in front of a reader/writer lock.
///
/// Writers hold the exclusive lock and bump the counter to odd before
/// mutating and back to even afterwards. Readers take the shared lock only
/// opportunistically: they spin while the counter is odd or the lock is
/// contended, and fall back to a blocking shared acquire once the retry
/// budget is exhausted. A read is accepted only if the counter is unchanged
/// across it.
pub struct SeqLock<T> {
    seq: AtomicU64,
    value: RwLock<T>,
    spin_limit: u32,
}

/// Exclusive access to a [`SeqLock`] value. The counter is odd while held.
pub struct SeqWriteGuard<'a, T> {
    lock: &'a SeqLock<T>,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> SeqLock<T> {
    /// Wraps `value`; readers retry up to `spin_limit` times before blocking.
    pub fn new(value: T, spin_limit: u32) -> Self {
        Self {
            seq: AtomicU64::new(0),
            value: RwLock::new(value),
            spin_limit: spin_limit.max(1),
        }
    }

    /// Runs `f` against a consistent view of the value.
    pub fn read<R>(&self, mut f: impl FnMut(&T) -> R) -> R {
        let mut attempts = 0u32;
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                attempts += 1;
                if attempts >= self.spin_limit {
                    return self.read_locked(&mut f);
                }
                backoff(attempts);
                continue;
            }
            let Some(guard) = self.value.try_read() else {
                attempts += 1;
                if attempts >= self.spin_limit {
                    return self.read_locked(&mut f);
                }
                backoff(attempts);
                continue;
            };
            let out = f(&guard);
            drop(guard);
            if self.seq.load(Ordering::Acquire) == before {
                return out;
            }
            attempts += 1;
            if attempts >= self.spin_limit {
                return self.read_locked(&mut f);
            }
        }
    }

    fn read_locked<R>(&self, f: &mut impl FnMut(&T) -> R) -> R {
        let guard: RwLockReadGuard<'_, T> = self.value.read();
        f(&guard)
    }

    /// Takes the exclusive section and marks a write in flight.
    pub fn write(&self) -> SeqWriteGuard<'_, T> {
        let guard = self.value.write();
        self.seq.fetch_add(1, Ordering::AcqRel);
        SeqWriteGuard { lock: self, guard }
    }
}

impl<T> std::ops::Deref for SeqWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for SeqWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SeqWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.seq.fetch_add(1, Ordering::AcqRel);
    }
}

fn backoff(attempts: u32) {
    if attempts < 8 {
        std::hint::spin_loop();
    } else if attempts < 32 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_micros(50));
    }
}

/// One-shot completion signal carrying the outcome of a background step.
///
/// The first `finish` wins; later calls are ignored.
pub struct Latch {
    result: Mutex<Option<Result<()>>>,
    cv: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// Creates an unfinished latch.
    pub fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    /// Records `outcome` and wakes all waiters.
    pub fn finish(&self, outcome: Result<()>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.cv.notify_all();
        }
    }

    /// Blocks until the latch is finished and returns its outcome.
    pub fn wait(&self) -> Result<()> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return match result {
                    Ok(()) => Ok(()),
                    Err(err) => Err(err.duplicate()),
                };
            }
            self.cv.wait(&mut guard);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> Option<Result<()>> {
        let mut guard = self.result.lock();
        if guard.is_none() {
            self.cv.wait_for(&mut guard, timeout);
        }
        guard.as_ref().map(|result| match result {
            Ok(()) => Ok(()),
            Err(err) => Err(err.duplicate()),
        })
    }
}

/// Error returned when a latch is abandoned by a stopped worker.
pub(crate) fn abandoned() -> BitsyError {
    BitsyError::Internal("pipeline stopped before the request completed".into())
}
