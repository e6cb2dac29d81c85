//! Allocation dispatcher: size-based routing between the slab path and the
//! large-object guard-page path, and free-path type discrimination by
//! magic-cookie probing.

use std::ptr::NonNull;
use std::sync::Once;

use crate::config::{MAGIC_COOKIE, MAX_SMALL_SIZE, PAGE_SIZE, REDZONE_SIZE};
use crate::diagnostics;
use crate::slab::SlabHeader;
use crate::{thread_cache, GlobalState};

static PAGE_SIZE_CHECK: Once = Once::new();

/// Header placed at the start of every large-object page run.
#[repr(C)]
struct LargeHeader {
    size: usize,
    magic: u32,
}

/// Rounds `size` up to the next multiple of `align` (`align` must be a
/// power of two).
const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Resource exhaustion reported by the large-object path, kept distinct
/// from a process abort so it can be exercised in tests without killing
/// the test process; the public, infallible entry point below translates
/// this into `handle_alloc_error`.
#[derive(Debug)]
pub struct AllocError;

/// Allocates `n_bytes` for the caller, routing small requests through the
/// thread cache and large requests through a dedicated guard-paged page
/// run.
///
/// Returns `Err(AllocError)` on resource exhaustion from either path;
/// never aborts by itself.
pub fn try_allocate(n_bytes: usize, global: &GlobalState) -> Result<NonNull<u8>, AllocError> {
    if cfg!(debug_assertions) {
        PAGE_SIZE_CHECK.call_once(crate::config::assert_page_size_matches_supplier);
    }

    let _span = diagnostics::span::allocate(n_bytes);

    if n_bytes + REDZONE_SIZE > MAX_SMALL_SIZE {
        return allocate_large(n_bytes);
    }

    thread_cache::allocate(n_bytes, global).ok_or(AllocError)
}

fn allocate_large(n_bytes: usize) -> Result<NonNull<u8>, AllocError> {
    let header_size = std::mem::size_of::<LargeHeader>();
    let total = align_up(n_bytes + header_size, PAGE_SIZE) + PAGE_SIZE;

    let Some(base) = halloc_sys::acquire(total) else {
        return Err(AllocError);
    };

    // SAFETY: `base`/`total` describe the run we just acquired and own
    // exclusively; the trailing page becomes the guard page.
    unsafe {
        let guard_addr = base.as_ptr().add(total - PAGE_SIZE);
        let guard_ptr = NonNull::new_unchecked(guard_addr);
        // Best-effort: if the OS cannot protect the page we still return a
        // usable (if unguarded) allocation rather than failing outright.
        let _ = halloc_sys::protect(guard_ptr, PAGE_SIZE);

        let header = base.as_ptr().cast::<LargeHeader>();
        header.write(LargeHeader {
            size: total,
            magic: MAGIC_COOKIE,
        });

        Ok(NonNull::new_unchecked(base.as_ptr().add(header_size)))
    }
}

/// Frees `ptr`, discriminating small vs. large by probing for a large
/// header's magic cookie first, then the in-page slab header's.
///
/// A null pointer is silently accepted. A pointer with neither a valid
/// large header nor a valid slab header is a security violation: the
/// process is aborted after a diagnostic is printed.
///
/// # Safety
///
/// `ptr`, if non-null, must either be null or a pointer previously
/// returned by [`try_allocate`] on this allocator and not yet freed.
pub unsafe fn free(ptr: *mut u8, global: &GlobalState) {
    let Some(ptr) = NonNull::new(ptr) else {
        return;
    };

    let _span = diagnostics::span::free(ptr.as_ptr() as usize);
    let header_size = std::mem::size_of::<LargeHeader>();

    // SAFETY: computing a candidate header address by subtracting a fixed
    // offset never dereferences anything until the page-alignment and
    // read below.
    let candidate = unsafe { ptr.as_ptr().sub(header_size) };
    if (candidate as usize) & (PAGE_SIZE - 1) == 0 {
        // SAFETY: `candidate` is page-aligned, but may not be mapped at
        // all if `ptr` was not a large allocation; this allocator only
        // ever hands out pointers into memory it mapped itself, and a
        // forged page-aligned pointer reading garbage here is the
        // documented contract violation this check exists to catch.
        let large_header = unsafe { &*candidate.cast::<LargeHeader>() };
        if large_header.magic == MAGIC_COOKIE {
            let size = large_header.size;
            // SAFETY: `candidate`/`size` describe a run this allocator
            // acquired from the page supplier in `allocate_large`.
            unsafe {
                halloc_sys::release(NonNull::new_unchecked(candidate), size);
            }
            return;
        }
    }

    // SAFETY: masking to the page base never dereferences anything until
    // the read below.
    let slab_header = unsafe { SlabHeader::from_ptr(ptr.as_ptr()) };
    // SAFETY: same rationale as the large-header probe above: reading the
    // magic field of a forged pointer is exactly the check that rejects it.
    let magic = unsafe { (*slab_header).magic };
    if magic == MAGIC_COOKIE {
        // SAFETY: a valid slab magic at this address is this allocator's
        // contract for "this is one of our slots"; `deallocate` takes it
        // from here, including redzone/double-free verification.
        unsafe { thread_cache::deallocate(ptr, global) };
        return;
    }

    diagnostics::span::security_violation("invalid free: no magic cookie found", ptr.as_ptr() as usize);
    halloc_sys::raw_abort_print("\n[halloc] SECURITY PANIC: invalid free (no magic cookie found)\n");
    std::process::abort();
}
