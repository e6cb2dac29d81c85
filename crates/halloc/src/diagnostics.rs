//! Structured diagnostics: an always-on metrics surface plus an optional
//! `tracing` integration for forensic detail around security aborts.
//!
//! The metrics here are for observability only; nothing in the allocator's
//! correctness depends on them. When the `tracing` feature is disabled,
//! everything under [`span`] compiles to a no-op, matching the teacher
//! crate's own `#[cfg(feature = "tracing")]` split.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters for the whole process. Thread-local counters below
/// feed per-thread behavior; these track the shared subsystems (C1/C3/C5).
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    slabs_acquired: AtomicU64,
    purge_cycles: AtomicU64,
    quarantined_bytes: AtomicU64,
}

impl GlobalMetrics {
    const fn new() -> Self {
        Self {
            slabs_acquired: AtomicU64::new(0),
            purge_cycles: AtomicU64::new(0),
            quarantined_bytes: AtomicU64::new(0),
        }
    }

    /// Total slabs ever acquired from the page supplier.
    #[must_use]
    pub fn slabs_acquired(&self) -> u64 {
        self.slabs_acquired.load(Ordering::Relaxed)
    }

    /// Total global-quarantine purge cycles that have run.
    #[must_use]
    pub fn purge_cycles(&self) -> u64 {
        self.purge_cycles.load(Ordering::Relaxed)
    }

    /// Current cumulative quarantined byte total (best-effort, racy read).
    #[must_use]
    pub fn quarantined_bytes(&self) -> u64 {
        self.quarantined_bytes.load(Ordering::Relaxed)
    }
}

static GLOBAL: GlobalMetrics = GlobalMetrics::new();

/// Returns the process-wide metrics singleton.
#[must_use]
pub fn global() -> &'static GlobalMetrics {
    &GLOBAL
}

pub(crate) fn record_slab_acquired() {
    GLOBAL.slabs_acquired.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_purge_cycle(bytes_released: u64) {
    GLOBAL.purge_cycles.fetch_add(1, Ordering::Relaxed);
    GLOBAL.quarantined_bytes.fetch_sub(bytes_released, Ordering::Relaxed);
}

pub(crate) fn record_bytes_quarantined(bytes: u64) {
    GLOBAL.quarantined_bytes.fetch_add(bytes, Ordering::Relaxed);
}

/// Per-thread allocation counters, analogous to the teacher's `GcMetrics`
/// but scoped to one thread cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadMetrics {
    /// Total successful small+large allocations on this thread.
    pub allocations: u64,
    /// Total frees processed on this thread.
    pub frees: u64,
    /// Number of times the thread cache refilled a magazine from the
    /// central cache.
    pub magazine_refills: u64,
    /// Number of local quarantine batches handed off to the global
    /// quarantine.
    pub batches_handed_off: u64,
}

/// Resets the process-wide metrics counters (tests only).
pub fn reset_for_testing() {
    GLOBAL.slabs_acquired.store(0, Ordering::Relaxed);
    GLOBAL.purge_cycles.store(0, Ordering::Relaxed);
    GLOBAL.quarantined_bytes.store(0, Ordering::Relaxed);
}

/// Monotonically increasing id minted for each quarantine purge cycle, the
/// quarantine's analogue of the teacher's GC-run id, so log lines from the
/// same purge can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeId(pub u64);

static NEXT_PURGE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_purge_id() -> PurgeId {
    PurgeId(NEXT_PURGE_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(feature = "tracing")]
pub(crate) mod span {
    use super::PurgeId;
    use tracing::{span, Level};

    pub fn allocate(n_bytes: usize) -> tracing::span::EnteredSpan {
        span!(Level::DEBUG, "halloc_allocate", n_bytes).entered()
    }

    pub fn free(ptr: usize) -> tracing::span::EnteredSpan {
        span!(Level::DEBUG, "halloc_free", ptr).entered()
    }

    pub fn purge(id: PurgeId) -> tracing::span::EnteredSpan {
        span!(Level::DEBUG, "quarantine_purge", purge_id = id.0).entered()
    }

    pub fn security_violation(kind: &str, ptr: usize) {
        tracing::error!(kind, ptr, "halloc security panic");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) mod span {
    use super::PurgeId;

    pub fn allocate(_n_bytes: usize) {}
    pub fn free(_ptr: usize) {}
    pub fn purge(_id: PurgeId) {}
    pub fn security_violation(_kind: &str, _ptr: usize) {}
}
