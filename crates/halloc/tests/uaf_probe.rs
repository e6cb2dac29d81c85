//! A freed small object must read back as poison, not as whatever the
//! allocator's internals happen to leave lying around, for as long as it
//! sits in quarantine.

#[test]
fn freed_small_object_reads_back_as_poison() {
    halloc::test_util::reset();

    let ptr = halloc::allocate(24);
    // SAFETY: freshly allocated, ours to write and then free exactly once.
    unsafe {
        ptr.as_ptr().write_bytes(0x41, 24);
        halloc::free(ptr.as_ptr());
    }

    // A single free only lands in this thread's pending local batch, which
    // is not yet poisoned -- poisoning happens in `GlobalQuarantine::push`,
    // triggered once the local batch fills to its 128-pointer capacity.
    // Free enough further same-class objects to force that hand-off.
    for _ in 0..128 {
        let filler = halloc::allocate(24);
        // SAFETY: freshly allocated, freed immediately to push `ptr`'s
        // batch over the hand-off threshold.
        unsafe { halloc::free(filler.as_ptr()) };
    }

    // SAFETY: `ptr`'s batch has been pushed to the global quarantine by
    // now, which poisons every pointer it holds before anything else can
    // see it; the memory is still mapped, just poisoned.
    let probe = unsafe { ptr.as_ptr().cast::<u64>().read_unaligned() };
    assert_eq!(probe, 0xDEAD_DEAD_DEAD_DEAD, "freed slot did not read back as UAF poison");
}

#[test]
fn reallocation_after_quarantine_drain_gets_a_clean_slot() {
    halloc::test_util::reset();

    let mut freed = Vec::new();
    for _ in 0..200 {
        let p = halloc::allocate(32);
        freed.push(p);
    }
    for p in freed {
        // SAFETY: each pointer was allocated above and freed exactly once.
        unsafe { halloc::free(p.as_ptr()) };
    }

    // A fresh allocation must come back writable and not panic or abort,
    // whether it was served from quarantine leftovers or a new slab.
    let p = halloc::allocate(32);
    // SAFETY: ours to write and free.
    unsafe {
        p.as_ptr().write_bytes(0, 32);
        halloc::free(p.as_ptr());
    }
}
