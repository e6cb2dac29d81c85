//! A busy-spin mutual-exclusion lock for the central cache and the global
//! quarantine.
//!
//! Unlike `parking_lot::Mutex`, this is intentionally non-blocking with
//! respect to the OS scheduler for the common case: critical sections here
//! are a handful of bitmap/pointer operations, so parking a thread would
//! cost far more than spinning briefly. Acquisition busy-spins with a pause
//! hint; after roughly 100 failed attempts it yields the timeslice instead
//! of spinning forever, and then resets the counter.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Number of failed acquisition attempts before yielding the timeslice.
const SPIN_LIMIT: u32 = 100;

/// A cache-line-sized busy-spin lock guarding a `T`.
#[repr(align(64))]
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever granted through `lock()`, which
// holds `locked` for the duration of the borrow.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked spin lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spins = 0u32;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
            spins += 1;
            if spins > SPIN_LIMIT {
                std::thread::yield_now();
                spins = 0;
            }
        }
        SpinLockGuard { lock: self }
    }
}

/// RAII guard returned by [`SpinLock::lock`]; releases the lock on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies `locked` is held by this thread.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies `locked` is held by this thread.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
