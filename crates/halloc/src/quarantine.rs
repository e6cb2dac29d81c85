//! Global quarantine: a FIFO of freed small-object pointers held until a
//! use-after-free read sees poison, not valid data.
//!
//! Batch storage is backed directly by the page supplier rather than the
//! Rust global allocator: this crate can itself sit behind
//! `#[global_allocator]`, so anything it allocates through `Box`/`Vec`
//! would recurse back into its own `allocate` path. A quarantine batch is
//! therefore a single page, carved and freed the same way a slab is.

use std::ptr::NonNull;

use crate::config::{
    slot_size, MAX_SIZE_CLASSES, PAGE_SIZE, QUARANTINE_BATCH_CAPACITY, QUARANTINE_THRESHOLD,
    UAF_POISON,
};
use crate::diagnostics;
use crate::slab::SlabHeader;
use crate::sync::SpinLock;

/// A fixed-capacity batch of freed pointers awaiting reuse, chained into
/// the global quarantine's FIFO. Lives at the start of a single page
/// acquired from the page supplier.
#[repr(C)]
pub struct QuarantineBatch {
    ptrs: [Option<NonNull<u8>>; QUARANTINE_BATCH_CAPACITY],
    count: usize,
    total_bytes: usize,
    next: *mut QuarantineBatch,
}

// A batch is carved from a single page acquired from the page supplier
// (see `new_in_page`); it must fit in one page with room to spare for the
// page's own alignment, or construction would write past the mapping.
const _: () = assert!(std::mem::size_of::<QuarantineBatch>() <= PAGE_SIZE);

impl QuarantineBatch {
    /// Acquires a fresh page from the page supplier and constructs an
    /// empty batch in place at its start, or returns `None` if the
    /// supplier is out of pages.
    pub fn new_in_page() -> Option<NonNull<QuarantineBatch>> {
        let page = halloc_sys::acquire(PAGE_SIZE)?;
        let header = page.as_ptr().cast::<QuarantineBatch>();
        // SAFETY: `page` is a fresh, exclusively-owned, `PAGE_SIZE`-byte
        // run, large enough for one `QuarantineBatch` (128 pointers plus
        // three `usize`/pointer fields is well under 4096 bytes).
        unsafe {
            header.write(QuarantineBatch {
                ptrs: [None; QUARANTINE_BATCH_CAPACITY],
                count: 0,
                total_bytes: 0,
                next: std::ptr::null_mut(),
            });
            Some(NonNull::new_unchecked(header))
        }
    }

    /// Whether the batch has no more room for another pointer.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.count >= QUARANTINE_BATCH_CAPACITY
    }

    /// Appends `ptr`, sized `bytes`, to the batch.
    ///
    /// # Panics
    ///
    /// Panics if the batch is already full; callers must check
    /// [`is_full`](Self::is_full) first.
    pub fn push(&mut self, ptr: NonNull<u8>, bytes: usize) {
        assert!(!self.is_full(), "quarantine batch overflow");
        self.ptrs[self.count] = Some(ptr);
        self.count += 1;
        self.total_bytes += bytes;
    }
}

struct Fifo {
    head: *mut QuarantineBatch,
    tail: *mut QuarantineBatch,
    current_usage: usize,
}

// SAFETY: the chain is only ever walked while the enclosing `SpinLock` is
// held.
unsafe impl Send for Fifo {}

/// Process-wide singleton FIFO of quarantined batches.
pub struct GlobalQuarantine {
    fifo: SpinLock<Fifo>,
}

impl GlobalQuarantine {
    /// An empty global quarantine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fifo: SpinLock::new(Fifo {
                head: std::ptr::null_mut(),
                tail: std::ptr::null_mut(),
                current_usage: 0,
            }),
        }
    }

    /// Poisons every pointer in `batch` for UAF detection, then appends it
    /// to the FIFO tail and, past [`QUARANTINE_THRESHOLD`], purges the
    /// oldest batches back to the central cache.
    ///
    /// Poisoning happens *before* the lock is taken: it only touches memory
    /// this thread already exclusively owns, so there is no reason to hold
    /// up other threads' quarantine pushes for it.
    ///
    /// # Safety
    ///
    /// `batch` must point to a batch constructed by
    /// [`QuarantineBatch::new_in_page`] that nothing else holds a
    /// reference to; ownership passes to the global quarantine.
    pub unsafe fn push(&self, batch: NonNull<QuarantineBatch>, central: &crate::central::CentralCache) {
        // SAFETY: caller's contract grants exclusive access.
        let batch_ref = unsafe { &mut *batch.as_ptr() };
        for slot in batch_ref.ptrs.iter().take(batch_ref.count) {
            if let Some(ptr) = slot {
                // SAFETY: every pointer in a batch is a slab slot at least
                // 8 bytes wide (the smallest size class is 32 bytes), and
                // the caller no longer holds any live reference to it.
                unsafe {
                    ptr.as_ptr().cast::<u64>().write_unaligned(UAF_POISON);
                }
            }
        }

        diagnostics::record_bytes_quarantined(batch_ref.total_bytes as u64);
        batch_ref.next = std::ptr::null_mut();

        let mut fifo = self.fifo.lock();
        let bytes = batch_ref.total_bytes;
        let raw = batch.as_ptr();
        if fifo.tail.is_null() {
            fifo.head = raw;
        } else {
            // SAFETY: `fifo.tail` points at the current last node, still
            // live because it is only freed by `purge_locked` after being
            // unlinked.
            unsafe { (*fifo.tail).next = raw };
        }
        fifo.tail = raw;
        fifo.current_usage += bytes;

        if fifo.current_usage > QUARANTINE_THRESHOLD {
            // SAFETY: every node in the chain was constructed the same way
            // and is exclusively owned by the quarantine once linked in.
            unsafe { self.purge_locked(&mut fifo, central) };
        }
    }

    /// Drains batches from the FIFO head, oldest first, while the running
    /// total exceeds the threshold, releasing each pointer back to the
    /// central cache.
    ///
    /// A pointer whose slot size doesn't match any of the six classes is a
    /// deliberate, documented leak rather than a panic: it means the slab
    /// header was corrupted or the pointer never should have been
    /// quarantined, and crashing a process over a stray leaked slot would
    /// be a worse outcome than leaking it.
    ///
    /// # Safety
    ///
    /// Every node reachable from `fifo.head` must have been constructed by
    /// [`QuarantineBatch::new_in_page`].
    unsafe fn purge_locked(&self, fifo: &mut Fifo, central: &crate::central::CentralCache) {
        let purge_id = diagnostics::next_purge_id();
        let _span = diagnostics::span::purge(purge_id);

        while fifo.current_usage > QUARANTINE_THRESHOLD && !fifo.head.is_null() {
            let old = fifo.head;
            // SAFETY: `old` is a live node owned by this FIFO.
            let old_ref = unsafe { &*old };
            fifo.head = old_ref.next;
            if fifo.head.is_null() {
                fifo.tail = std::ptr::null_mut();
            }
            fifo.current_usage -= old_ref.total_bytes;

            for slot in old_ref.ptrs.iter().take(old_ref.count) {
                let Some(ptr) = slot else { continue };
                // SAFETY: every quarantined pointer was a valid slab slot
                // when it was pushed; the slab header itself is never
                // freed while any of its slots might still be quarantined.
                let object_size = unsafe { (*SlabHeader::from_ptr(ptr.as_ptr())).object_size };
                let idx = (0..MAX_SIZE_CLASSES).find(|&k| slot_size(k) as u32 == object_size);
                if let Some(idx) = idx {
                    // SAFETY: `ptr` was quarantined from size class `idx`
                    // and is not referenced anywhere else.
                    unsafe { central.release(*ptr, idx) };
                }
            }
            diagnostics::record_purge_cycle(old_ref.total_bytes as u64);

            // Return the batch's own page to the page supplier, rounding
            // to `PAGE_SIZE` on both sides of acquire/release.
            // SAFETY: `old` was obtained from `halloc_sys::acquire(PAGE_SIZE)`
            // in `QuarantineBatch::new_in_page` and nothing else holds a
            // pointer into it after being unlinked above.
            unsafe {
                halloc_sys::release(NonNull::new_unchecked(old.cast::<u8>()), PAGE_SIZE);
            }
        }
    }
}

impl Default for GlobalQuarantine {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets the global quarantine, leaking any outstanding batch pages
/// rather than releasing their pointers back to a central cache (tests
/// only).
pub fn reset_for_testing(q: &GlobalQuarantine) {
    let mut fifo = q.fifo.lock();
    fifo.head = std::ptr::null_mut();
    fifo.tail = std::ptr::null_mut();
    fifo.current_usage = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::CentralCache;

    #[test]
    fn push_poisons_the_first_eight_bytes() {
        let central = CentralCache::new();
        let quarantine = GlobalQuarantine::new();
        let mut out = [None; 1];
        central.fetch_bulk(0, &mut out, 1);
        let ptr = out[0].unwrap();

        let mut batch = QuarantineBatch::new_in_page().unwrap();
        // SAFETY: freshly constructed, exclusively owned here.
        unsafe { batch.as_mut().push(ptr, 32) };
        // SAFETY: `batch` was just constructed and nothing else holds it.
        unsafe { quarantine.push(batch, &central) };

        // SAFETY: the slot is still mapped; it has just been poisoned.
        let value = unsafe { ptr.as_ptr().cast::<u64>().read_unaligned() };
        assert_eq!(value, UAF_POISON);

        reset_for_testing(&quarantine);
        crate::central::reset_for_testing(&central);
    }

    #[test]
    fn purge_runs_once_threshold_is_exceeded() {
        let central = CentralCache::new();
        let quarantine = GlobalQuarantine::new();

        // 1024-byte slots: ~4100 pushes exceed the 4 MiB threshold.
        let needed = QUARANTINE_THRESHOLD / 1024 + 8;
        let mut remaining = needed;
        while remaining > 0 {
            let take = remaining.min(QUARANTINE_BATCH_CAPACITY);
            let mut out = vec![None; take];
            let fetched = central.fetch_bulk(5, &mut out, take);
            let mut batch = QuarantineBatch::new_in_page().unwrap();
            for ptr in out.into_iter().take(fetched) {
                // SAFETY: exclusively owned, freshly constructed batch.
                unsafe { batch.as_mut().push(ptr.unwrap(), 1024) };
            }
            // SAFETY: `batch` is exclusively owned and freshly constructed.
            unsafe { quarantine.push(batch, &central) };
            remaining -= take;
        }

        assert!(diagnostics::global().purge_cycles() >= 1);
        reset_for_testing(&quarantine);
        crate::central::reset_for_testing(&central);
    }
}
