//! High-volume churn of a single size class, enough to push the global
//! quarantine past its purge threshold repeatedly, matching the sustained
//! free-heavy workload the quarantine subsystem is sized for.

#[test]
fn sustained_churn_triggers_quarantine_purges() {
    halloc::test_util::reset();

    // 1024-byte slots: comfortably past the 4 MiB threshold several times
    // over without needing an unreasonable iteration count for a test run.
    const ITERATIONS: usize = 40_000;

    for _ in 0..ITERATIONS {
        let ptr = halloc::allocate(1000);
        // SAFETY: freshly allocated, freed exactly once.
        unsafe {
            ptr.as_ptr().write_bytes(0x11, 16);
            halloc::free(ptr.as_ptr());
        }
    }

    let metrics = halloc::global_metrics();
    assert!(
        metrics.purge_cycles() >= 1,
        "expected at least one quarantine purge after {ITERATIONS} frees, got {}",
        metrics.purge_cycles()
    );
    assert!(metrics.slabs_acquired() >= 1);
}

#[test]
fn mixed_size_class_churn_does_not_deadlock_or_corrupt() {
    halloc::test_util::reset();

    let sizes = [24usize, 60, 100, 200, 400, 900];
    let mut live = Vec::new();

    for round in 0..5_000 {
        let size = sizes[round % sizes.len()];
        let ptr = halloc::allocate(size);
        live.push((ptr, size));

        if live.len() > 64 {
            let (old, old_size) = live.remove(0);
            // SAFETY: `old` was allocated above and not yet freed.
            unsafe {
                let written = old.as_ptr().read();
                let _ = written;
                let _ = old_size;
                halloc::free(old.as_ptr());
            }
        }
    }

    for (ptr, _) in live {
        // SAFETY: every remaining pointer was allocated above and not yet freed.
        unsafe { halloc::free(ptr.as_ptr()) };
    }
}
