//! Tuning constants and the runtime-inspectable configuration surface.
//!
//! Every value here is part of the allocator's ABI: a slab built under one
//! set of constants is not interpretable under another, so none of this is
//! meant to vary at runtime. [`Tuning`] exists purely for introspection (a
//! benchmark harness asserting it agrees with what's compiled in, a test
//! asserting internal consistency) -- it is not a place to plug in
//! alternate values.

/// OS page size the slab layout is built around.
pub const PAGE_SIZE: usize = 4096;

/// Cache line width used to pad per-size-class locks against false sharing.
pub const CACHE_LINE: usize = 64;

/// User-byte ceiling (before redzone) served by the slab path.
pub const MAX_SMALL_SIZE: usize = 1024;

/// Number of size classes, slot sizes `32 << idx` for `idx` in `0..MAX_SIZE_CLASSES`.
pub const MAX_SIZE_CLASSES: usize = 6;

/// Sentinel written into slab and large-object headers.
pub const MAGIC_COOKIE: u32 = 0xDEAD_BEEF;

/// Cumulative quarantined bytes above which the global quarantine purges.
pub const QUARANTINE_THRESHOLD: usize = 4 * 1024 * 1024;

/// Trailing bytes of every slot reserved for overflow detection.
pub const REDZONE_SIZE: usize = 8;

/// Fill byte stamped into a slot's redzone at allocation time.
pub const REDZONE_BYTE: u8 = 0xCD;

/// Maximum pointers a thread cache batches from the central cache per refill.
pub const BATCH_SIZE: usize = 32;

/// Maximum pointers held in a single quarantine batch.
pub const QUARANTINE_BATCH_CAPACITY: usize = 128;

/// Pattern written over the first 8 bytes of every pointer entering quarantine.
pub const UAF_POISON: u64 = 0xDEAD_DEAD_DEAD_DEAD;

/// Maximum slots a single slab can carve, independent of how many slot-sized
/// chunks the page would otherwise fit (the free bitmap is 64 bits wide).
pub const MAX_SLOTS_PER_SLAB: usize = 64;

/// Returns the slot size in bytes for size-class index `idx`.
#[must_use]
pub const fn slot_size(idx: usize) -> usize {
    32usize << idx
}

/// Returns the size-class index whose slot fits `user_bytes` plus the
/// trailing redzone, or `None` if the request escapes to the large path.
#[must_use]
pub const fn size_class_for(user_bytes: usize) -> Option<usize> {
    let Some(required) = user_bytes.checked_add(REDZONE_SIZE) else {
        return None;
    };
    let mut idx = 0;
    while idx < MAX_SIZE_CLASSES {
        if required <= slot_size(idx) {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

/// A snapshot of the compile-time tuning table, for introspection and tests.
///
/// Constructed only via [`Tuning::current`]; there is deliberately no way to
/// build one with different values, since nothing downstream would honor
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    /// See [`PAGE_SIZE`].
    pub page_size: usize,
    /// See [`CACHE_LINE`].
    pub cache_line: usize,
    /// See [`MAX_SMALL_SIZE`].
    pub max_small_size: usize,
    /// See [`MAX_SIZE_CLASSES`].
    pub max_size_classes: usize,
    /// See [`MAGIC_COOKIE`].
    pub magic_cookie: u32,
    /// See [`QUARANTINE_THRESHOLD`].
    pub quarantine_threshold: usize,
    /// See [`REDZONE_SIZE`].
    pub redzone_size: usize,
    /// See [`REDZONE_BYTE`].
    pub redzone_byte: u8,
    /// See [`BATCH_SIZE`].
    pub batch_size: usize,
    /// See [`QUARANTINE_BATCH_CAPACITY`].
    pub quarantine_batch_capacity: usize,
}

impl Tuning {
    /// Returns the tuning table baked into this build.
    ///
    /// # Panics
    ///
    /// Asserts, at the point of definition, that the constants are
    /// internally consistent (e.g. that a full quarantine batch of the
    /// largest slot size is the same order of magnitude as the purge
    /// threshold). A failure here means the constants were edited without
    /// updating each other, not a runtime condition.
    #[must_use]
    pub const fn current() -> Self {
        let largest_slot = slot_size(MAX_SIZE_CLASSES - 1);
        let full_batch_bytes = QUARANTINE_BATCH_CAPACITY * largest_slot;
        assert!(
            full_batch_bytes <= QUARANTINE_THRESHOLD * 4,
            "quarantine batch capacity and threshold have drifted out of the same order of magnitude"
        );
        assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");
        assert!(MAX_SIZE_CLASSES <= 64, "size-class count must fit the bitmap addressing scheme");

        Self {
            page_size: PAGE_SIZE,
            cache_line: CACHE_LINE,
            max_small_size: MAX_SMALL_SIZE,
            max_size_classes: MAX_SIZE_CLASSES,
            magic_cookie: MAGIC_COOKIE,
            quarantine_threshold: QUARANTINE_THRESHOLD,
            redzone_size: REDZONE_SIZE,
            redzone_byte: REDZONE_BYTE,
            batch_size: BATCH_SIZE,
            quarantine_batch_capacity: QUARANTINE_BATCH_CAPACITY,
        }
    }
}

/// Asserts that the page supplier's page size matches the compiled-in
/// [`PAGE_SIZE`]. A mismatch means the slab layout this build assumes is
/// unsound, so this aborts rather than returning an error: there is no
/// sensible way to keep running with slabs carved for the wrong page size.
pub fn assert_page_size_matches_supplier() {
    let reported = halloc_sys::page_size();
    assert_eq!(
        reported, PAGE_SIZE,
        "halloc: OS page size ({reported}) does not match the compiled-in PAGE_SIZE ({PAGE_SIZE})"
    );
}
