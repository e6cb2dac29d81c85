//! A hardened small-object memory allocator.
//!
//! `halloc` sits behind a process's general-purpose allocation entry
//! points and services small-object requests through a three-tier
//! pipeline -- per-thread cache, central cache of slabs, OS page supplier
//! -- with security mitigations against the most common C-style heap
//! exploits:
//!
//! - **Use-after-free**: freed small objects enter a [`quarantine`] FIFO
//!   and are poisoned before reuse is even possible.
//! - **Double free / invalid free**: every free is checked against a
//!   redzone pattern and a magic-cookie-tagged header before it is
//!   honored.
//! - **Linear buffer overflow**: every slot carries a trailing redzone,
//!   checked on free.
//! - **Out-of-bounds write past a large allocation**: large objects are
//!   followed by an inaccessible guard page.
//!
//! # Quick start
//!
//! ```
//! use halloc::Halloc;
//!
//! #[global_allocator]
//! static ALLOC: Halloc = Halloc::new();
//!
//! fn main() {
//!     let v: Vec<u8> = Vec::with_capacity(64);
//!     drop(v);
//! }
//! ```
//!
//! Or drive the pipeline directly without installing it as the process
//! allocator:
//!
//! ```
//! use halloc::{allocate, free};
//!
//! let p = allocate(24);
//! unsafe {
//!     p.as_ptr().write_bytes(0, 24);
//!     free(p.as_ptr());
//! }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

use std::alloc::{handle_alloc_error, GlobalAlloc, Layout};
use std::ptr::NonNull;

pub mod central;
pub mod config;
pub mod dispatcher;
pub mod diagnostics;
pub mod quarantine;
pub mod slab;
pub mod sync;
mod thread_cache;

pub use config::Tuning;
pub use diagnostics::{global as global_metrics, GlobalMetrics, ThreadMetrics};
pub use dispatcher::AllocError;

/// The allocator's process-wide shared state: the central cache and the
/// global quarantine. Thread caches are thread-local and live outside this
/// struct (see the crate-private `thread_cache` module).
///
/// Zero-initialization (via the `const fn` constructors both subsystems
/// expose) is a valid starting state for both, matching the process-start
/// lifecycle: there is no explicit teardown, the OS reclaims pages at
/// process exit.
pub struct GlobalState {
    pub(crate) central: central::CentralCache,
    pub(crate) quarantine: quarantine::GlobalQuarantine,
}

impl GlobalState {
    /// An empty global state: no slabs acquired yet, no quarantined
    /// batches.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            central: central::CentralCache::new(),
            quarantine: quarantine::GlobalQuarantine::new(),
        }
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: GlobalState = GlobalState::new();

/// Allocates `n_bytes`, routing through the slab path or the large-object
/// guard-page path as appropriate.
///
/// # Panics
///
/// Calls [`std::alloc::handle_alloc_error`] on resource exhaustion, same
/// as the rest of the standard allocation ecosystem; this function never
/// returns null.
#[must_use]
pub fn allocate(n_bytes: usize) -> NonNull<u8> {
    match dispatcher::try_allocate(n_bytes, &GLOBAL) {
        Ok(ptr) => ptr,
        Err(AllocError) => {
            let layout = Layout::from_size_align(n_bytes.max(1), 1).unwrap_or(Layout::new::<u8>());
            handle_alloc_error(layout)
        }
    }
}

/// Frees `ptr`. Accepts null as a no-op; aborts the process if `ptr` is
/// neither null nor a pointer this allocator issued.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by [`allocate`] (or
/// by [`Halloc`]'s `GlobalAlloc` impl) on this allocator, not yet freed.
pub unsafe fn free(ptr: *mut u8) {
    // SAFETY: forwarded from the caller's contract.
    unsafe { dispatcher::free(ptr, &GLOBAL) };
}

/// A `std::alloc::GlobalAlloc` front end over the hardened allocation
/// pipeline, installable via `#[global_allocator]`.
///
/// `Halloc` itself is a zero-sized handle; all state lives in the
/// process-wide [`GlobalState`] singleton and per-thread caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct Halloc;

impl Halloc {
    /// Creates a handle to the process-wide hardened allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

// SAFETY: `alloc`/`dealloc` forward to `try_allocate`/`free`, which are
// safe to call concurrently from any thread (see the module-level
// concurrency discussion in `central` and `quarantine`). Layout's size and
// alignment are honored: allocations are served from either a slab whose
// slot size is always a multiple of the redzone-adjusted request, or a
// page-aligned large-object run; both exceed any alignment a small-object
// caller could request (the largest small-object alignment is bounded by
// `PAGE_SIZE`).
unsafe impl GlobalAlloc for Halloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match dispatcher::try_allocate(layout.size(), &GLOBAL) {
            Ok(ptr) => ptr.as_ptr(),
            Err(AllocError) => std::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { dispatcher::free(ptr, &GLOBAL) };
    }
}

#[doc(hidden)]
pub mod test_util {
    //! Resets all process-wide singleton state so that tests exercising
    //! the central cache or global quarantine directly do not leak state
    //! into later tests sharing the same process.
    //!
    //! Carries no `cfg(test)` gate: integration tests under `tests/` and
    //! the benchmarks under `benches/` are separate crates linked against
    //! the ordinary (non-`cfg(test)`) build of this library, so a
    //! `cfg(test)`-gated module would simply not exist for them to call.

    /// Resets the global state, the calling thread's cache, and the
    /// metrics counters.
    ///
    /// Outstanding slabs and quarantine-batch pages from before the reset
    /// are leaked rather than unmapped: nothing tracks whether any other
    /// thread still believes they are live, and unmapping them out from
    /// under a concurrent user would be unsound. This is acceptable in a
    /// test process that exits soon after.
    pub fn reset() {
        crate::central::reset_for_testing(&crate::GLOBAL.central);
        crate::quarantine::reset_for_testing(&crate::GLOBAL.quarantine);
        crate::thread_cache::reset_for_testing();
        crate::diagnostics::reset_for_testing();
    }
}
