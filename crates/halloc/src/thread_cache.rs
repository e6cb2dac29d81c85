//! Thread cache: the contention-free fast path. One magazine per size
//! class plus a lazily-created local quarantine batch, all thread-local.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use crate::config::{size_class_for, slot_size, BATCH_SIZE, MAX_SIZE_CLASSES, REDZONE_BYTE, REDZONE_SIZE};
use crate::diagnostics::{self, ThreadMetrics};
use crate::quarantine::QuarantineBatch;
use crate::slab::SlabHeader;
use crate::GlobalState;

/// A bounded stack of free pointers for one size class, the fast path's
/// "magazine".
struct Magazine {
    slots: [Option<NonNull<u8>>; BATCH_SIZE],
    len: usize,
}

impl Magazine {
    const fn new() -> Self {
        Self {
            slots: [None; BATCH_SIZE],
            len: 0,
        }
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        self.slots[self.len].take()
    }

    fn push_many(&mut self, ptrs: &[Option<NonNull<u8>>]) {
        for &p in ptrs {
            self.slots[self.len] = p;
            self.len += 1;
        }
    }
}

/// Per-thread allocation state: one magazine per size class, a lazily
/// created local quarantine batch, and a reentrancy guard for the batch's
/// lazy allocation.
pub struct ThreadCache {
    magazines: [Magazine; MAX_SIZE_CLASSES],
    local_batch: Cell<Option<NonNull<QuarantineBatch>>>,
    initializing: Cell<bool>,
    rng: Cell<u32>,
    metrics: Cell<ThreadMetrics>,
}

impl ThreadCache {
    fn new() -> Self {
        const EMPTY: Magazine = Magazine::new();
        Self {
            magazines: [EMPTY; MAX_SIZE_CLASSES],
            local_batch: Cell::new(None),
            initializing: Cell::new(false),
            // Nonzero seed; xorshift32 is undefined at state zero.
            rng: Cell::new(0x1234_5678 ^ (std::process::id() as u32 | 1)),
            metrics: Cell::new(ThreadMetrics::default()),
        }
    }

    /// Allocates a small-object pointer for `n_user_bytes`, or `None` if
    /// the request doesn't fit any size class (the dispatcher must then
    /// fall back to the large-object path) or the central cache could not
    /// refill the magazine.
    fn allocate(&mut self, n_user_bytes: usize, global: &GlobalState) -> Option<NonNull<u8>> {
        let idx = size_class_for(n_user_bytes)?;
        let magazine = &mut self.magazines[idx];

        let ptr = if let Some(ptr) = magazine.pop() {
            ptr
        } else {
            let mut out = [None; BATCH_SIZE];
            let fetched = global.central.fetch_bulk(idx, &mut out, BATCH_SIZE);
            if fetched == 0 {
                return None;
            }
            magazine.push_many(&out[..fetched]);
            let mut metrics = self.metrics.get();
            metrics.magazine_refills += 1;
            self.metrics.set(metrics);
            magazine.pop()?
        };

        let size = slot_size(idx);
        // SAFETY: `ptr` is a freshly issued slot at least `size` bytes
        // wide; the redzone lies entirely within it.
        unsafe {
            let redzone = ptr.as_ptr().add(size - REDZONE_SIZE);
            std::ptr::write_bytes(redzone, REDZONE_BYTE, REDZONE_SIZE);
        }

        let mut metrics = self.metrics.get();
        metrics.allocations += 1;
        self.metrics.set(metrics);
        Some(ptr)
    }

    /// Returns a small-object pointer, verifying its redzone and routing
    /// it into the local quarantine batch.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer previously returned by `allocate` on
    /// some thread, not yet freed.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, global: &GlobalState) {
        if self.local_batch.get().is_none() {
            if self.initializing.get() {
                // Reentrant free during the lazy batch allocation below;
                // accepted as a narrow, bounded leak rather than risking
                // unbounded recursion into the allocator.
                return;
            }
            self.initializing.set(true);
            let fresh = QuarantineBatch::new_in_page();
            self.initializing.set(false);
            let Some(fresh) = fresh else { return };
            self.local_batch.set(Some(fresh));
        }

        // SAFETY: `ptr` was issued by this allocator's slab path.
        let header = unsafe { SlabHeader::from_ptr(ptr.as_ptr()) };
        // SAFETY: dispatcher has already validated `header.magic` before
        // routing here.
        let slab = unsafe { &*header };
        let object_size = slab.object_size as usize;

        // SAFETY: `ptr` lies within `slab`'s slot region; it was issued by
        // this allocator's slab path per the caller's contract.
        let index = unsafe { slab.slot_index(ptr.as_ptr()) };
        // The authoritative double-free check: this bit is cleared on the
        // *first* free, well before quarantine poisoning or the eventual
        // hand-back to the central cache, so a second free of the same
        // pointer finds it already clear regardless of where the slot
        // currently sits in the pipeline.
        if !slab.clear_in_use(index) {
            diagnostics::span::security_violation("double free", ptr.as_ptr() as usize);
            halloc_sys::raw_abort_print("\n[halloc] SECURITY PANIC: double free\n");
            std::process::abort();
        }

        // SAFETY: `object_size` bytes starting at `ptr` are this slot.
        let redzone = unsafe { ptr.as_ptr().add(object_size - REDZONE_SIZE) };
        // SAFETY: reading back exactly the bytes written by `allocate`; a
        // mismatch here is a linear buffer overflow into the trailing
        // redzone (the double-free case was already rejected above).
        let tail = unsafe { std::slice::from_raw_parts(redzone, REDZONE_SIZE) };
        if tail.iter().any(|&b| b != REDZONE_BYTE) {
            diagnostics::span::security_violation("redzone corrupted", ptr.as_ptr() as usize);
            halloc_sys::raw_abort_print("\n[halloc] SECURITY PANIC: redzone corrupted\n");
            std::process::abort();
        }

        // SAFETY: `self.local_batch` is `Some` by this point.
        let batch_ptr = self.local_batch.get().unwrap();
        // SAFETY: exclusively owned by this thread until handed off below.
        let batch = unsafe { &mut *batch_ptr.as_ptr() };
        batch.push(ptr, object_size);

        let mut metrics = self.metrics.get();
        metrics.frees += 1;
        self.metrics.set(metrics);

        if batch.is_full() {
            // SAFETY: `batch_ptr` was constructed by `new_in_page` and
            // nothing else references it.
            unsafe { global.quarantine.push(batch_ptr, &global.central) };
            self.local_batch.set(None);
            let mut metrics = self.metrics.get();
            metrics.batches_handed_off += 1;
            self.metrics.set(metrics);
        }
    }

    /// Snapshot of this thread's allocation counters.
    #[must_use]
    pub fn metrics(&self) -> ThreadMetrics {
        self.metrics.get()
    }
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static THREAD_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::new());
}

/// Runs `f` with access to the calling thread's cache.
pub(crate) fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> R {
    THREAD_CACHE.with(|cache| f(&mut cache.borrow_mut()))
}

pub(crate) fn allocate(n_user_bytes: usize, global: &GlobalState) -> Option<NonNull<u8>> {
    with_thread_cache(|cache| cache.allocate(n_user_bytes, global))
}

/// # Safety
///
/// See [`ThreadCache::deallocate`].
pub(crate) unsafe fn deallocate(ptr: NonNull<u8>, global: &GlobalState) {
    with_thread_cache(|cache| {
        // SAFETY: forwarded from the caller's contract.
        unsafe { cache.deallocate(ptr, global) };
    });
}

/// Returns the next value from this thread's xorshift32 stream, used for
/// randomized slot selection in the central cache. Thread-local so the RNG
/// itself is never a source of cross-thread contention.
pub(crate) fn next_random_u32() -> u32 {
    with_thread_cache(|cache| {
        let mut x = cache.rng.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        cache.rng.set(x);
        x
    })
}

/// Resets the calling thread's cache (tests only).
pub fn reset_for_testing() {
    THREAD_CACHE.with(|cache| *cache.borrow_mut() = ThreadCache::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlobalState;

    #[test]
    fn allocate_stamps_the_redzone() {
        let global = GlobalState::new();
        reset_for_testing();
        let ptr = allocate(24, &global).unwrap();
        let size = slot_size(size_class_for(24).unwrap());
        // SAFETY: freshly allocated slot, `size` bytes wide.
        let tail = unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(size - REDZONE_SIZE), REDZONE_SIZE) };
        assert!(tail.iter().all(|&b| b == REDZONE_BYTE));
        reset_for_testing();
        crate::central::reset_for_testing(&global.central);
    }

    #[test]
    fn out_of_range_size_returns_none() {
        let global = GlobalState::new();
        reset_for_testing();
        assert!(allocate(4096, &global).is_none());
    }

    #[test]
    fn xorshift_stream_is_not_constant() {
        reset_for_testing();
        let a = next_random_u32();
        let b = next_random_u32();
        assert_ne!(a, b);
    }
}
