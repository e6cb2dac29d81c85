//! OS page supplier for the `halloc` hardened allocator.
//!
//! This crate is the sole owner of the process's raw page mappings: it is
//! the only place that is allowed to call into the platform's virtual memory
//! facility (`mmap`/`mprotect` on Unix, `VirtualAlloc`/`VirtualProtect` on
//! Windows). Everything above it talks in terms of [`acquire`], [`release`]
//! and [`protect`].
//!
//! Unlike a general-purpose mmap wrapper, this crate hands out bare
//! pointers rather than an RAII guard: slab and large-object lifetime is
//! tracked by the allocator's own bookkeeping (bitmaps, quarantine FIFOs),
//! not by a Rust `Drop` impl, so an owning wrapper type would only get in
//! the way.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

/// Returns the platform page size in bytes (cached after the first call).
#[must_use]
pub fn page_size() -> usize {
    os::page_size()
}

/// Acquires a fresh, writable, page-aligned run of at least `size` bytes
/// from the OS.
///
/// The contents of the returned memory are unspecified until written (most
/// platforms zero-fill fresh anonymous mappings, but callers must not rely
/// on this). Returns `None` if the OS cannot satisfy the request.
///
/// # Panics
///
/// Panics if `size` is zero; a zero-length page run has no address the
/// allocator could hand out.
#[must_use]
pub fn acquire(size: usize) -> Option<NonNull<u8>> {
    assert!(size > 0, "halloc_sys::acquire: size must be non-zero");

    // SAFETY: size is non-zero, checked above.
    let result = unsafe { os::map_pages(size) };
    match result {
        Ok(ptr) => NonNull::new(ptr),
        Err(_) => None,
    }
}

/// Returns a run previously obtained from [`acquire`] back to the OS.
///
/// # Safety
///
/// `ptr` and `size` must describe a live mapping previously returned by
/// [`acquire`] with the same (or, on Unix, any non-larger) size, and no
/// other code may hold a pointer derived from it after this call returns.
pub unsafe fn release(ptr: NonNull<u8>, size: usize) {
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        os::unmap_pages(ptr.as_ptr(), size);
    }
}

/// Marks `size` bytes starting at `ptr` as inaccessible. Any subsequent
/// read or write to that range faults.
///
/// # Safety
///
/// `ptr` and `size` must describe pages currently owned by the caller
/// (typically the tail guard page of a large-object run).
pub unsafe fn protect(ptr: NonNull<u8>, size: usize) -> io::Result<()> {
    // SAFETY: forwarded from the caller's contract.
    unsafe { os::protect_none(ptr.as_ptr(), size) }
}

/// Writes a fixed diagnostic message straight to the process's error
/// stream via a raw, unbuffered syscall.
///
/// This exists for the narrow moment between detecting a security
/// violation (corrupted redzone, forged magic cookie, double free) and
/// aborting the process: by that point stdio may be in an inconsistent
/// state, or the corruption may itself have damaged heap-backed buffering,
/// so the message is written with the most primitive mechanism available.
pub fn raw_abort_print(msg: &str) {
    os::raw_write_stderr(msg.as_bytes());
}
