//! Central cache: per-size-class partial-slab lists shared by all threads.
//!
//! Each size class owns an independent, cache-line-aligned spin lock so
//! that contention on one class never blocks another.

use std::ptr::NonNull;

use crate::config::{slot_size, MAX_SIZE_CLASSES, PAGE_SIZE};
use crate::diagnostics;
use crate::slab::SlabHeader;
use crate::sync::SpinLock;

struct PartialList {
    head: *mut SlabHeader,
}

// SAFETY: all access goes through `CentralCache`'s per-class `SpinLock`.
unsafe impl Send for PartialList {}

/// One size class's partial-slab list plus its dedicated lock.
struct SizeClass {
    list: SpinLock<PartialList>,
}

/// Process-wide singleton holding every size class's partial-slab lists.
///
/// `fetch_bulk` and `release` are the only entry points; both take the
/// relevant class's lock and nothing else, so classes never contend with
/// each other.
pub struct CentralCache {
    classes: [SizeClass; MAX_SIZE_CLASSES],
}

impl CentralCache {
    /// An empty central cache (all size classes start with no slabs).
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: SizeClass = SizeClass {
            list: SpinLock::new(PartialList {
                head: std::ptr::null_mut(),
            }),
        };
        Self {
            classes: [EMPTY; MAX_SIZE_CLASSES],
        }
    }

    /// Fetches up to `max_count` free slot pointers for size class `idx`
    /// into `out`, returning how many were actually fetched.
    ///
    /// A short count (including zero) means the page supplier could not
    /// satisfy a fresh slab request; the central cache never treats that as
    /// an error, it just reports what it managed to hand out.
    pub fn fetch_bulk(&self, idx: usize, out: &mut [Option<NonNull<u8>>], max_count: usize) -> usize {
        debug_assert!(idx < MAX_SIZE_CLASSES);
        let slot_size = slot_size(idx);
        let mut fetched = 0usize;
        let mut list = self.classes[idx].list.lock();

        'outer: while fetched < max_count {
            if list.head.is_null() {
                let Some(page) = halloc_sys::acquire(PAGE_SIZE) else {
                    break;
                };
                diagnostics::record_slab_acquired();
                // SAFETY: `page` is a fresh, exclusively-owned page.
                let header = unsafe { SlabHeader::init(page, slot_size) };
                list.head = header.as_ptr();
            }

            // SAFETY: `list.head` is either null (handled above) or a
            // slab installed by this function, always under the class lock.
            let slab = unsafe { &mut *list.head };
            let full_mask = slab.full_free_mask();

            while fetched < max_count && slab.free_bitmap != 0 {
                let rng = crate::thread_cache::next_random_u32();
                let Some(bit) = crate::slab::pick_random_free_slot(slab.free_bitmap, rng) else {
                    break;
                };
                slab.free_bitmap &= !(1u64 << bit);
                slab.mark_in_use(bit);
                // SAFETY: `bit` is a set bit recovered from this slab's own
                // bitmap, i.e. a valid slot index.
                let ptr = unsafe { slab.slot_ptr(bit) };
                out[fetched] = NonNull::new(ptr);
                fetched += 1;
            }

            if slab.is_empty(full_mask) {
                list.head = slab.next_slab;
                slab.next_slab = std::ptr::null_mut();
                continue 'outer;
            }
            break;
        }

        fetched
    }

    /// Returns a single slot pointer to its slab, reattaching the slab at
    /// the head of its class's partial list if it was previously full.
    ///
    /// # Safety
    ///
    /// `ptr` must be a slot previously issued by `fetch_bulk` for the same
    /// `idx` and not currently live anywhere else.
    pub unsafe fn release(&self, ptr: NonNull<u8>, idx: usize) {
        debug_assert!(idx < MAX_SIZE_CLASSES);
        let mut list = self.classes[idx].list.lock();

        // SAFETY: forwarded from the caller's contract.
        let header = unsafe { SlabHeader::from_ptr(ptr.as_ptr()) };
        // SAFETY: `header` was validated by the caller (dispatcher) before
        // routing here.
        let slab = unsafe { &mut *header };
        let was_full = slab.free_bitmap == 0;

        // SAFETY: `ptr` lies within `slab`'s slot region by contract.
        let index = unsafe { slab.slot_index(ptr.as_ptr()) };
        slab.free_bitmap |= 1u64 << index;

        if was_full {
            slab.next_slab = list.head;
            list.head = header;
        }
    }
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets all central-cache state, leaking any outstanding slabs rather
/// than unmapping them (tests only -- this is not safe to call while any
/// thread cache still believes those slabs are live).
pub fn reset_for_testing(cache: &CentralCache) {
    for class in &cache.classes {
        class.list.lock().head = std::ptr::null_mut();
    }
}
