//! Fatal-path security checks. Each of these corrupts the heap in a way the
//! allocator is required to detect, which means the process under test is
//! expected to call `std::process::abort()` and never return from `free`.
//! That can't be caught with `#[should_panic]` (it only catches unwinding
//! panics, not process termination), so each scenario re-executes this same
//! test binary as a child process, asking the harness to run only that one
//! test.
//!
//! A plain `!status.success()` check is not enough: every scenario here
//! falls back to `panic!(...)` if the allocator *fails* to detect the
//! violation, and an ordinary unwinding panic also exits with a non-zero
//! status (101). That would make the test pass identically whether the
//! security check fired or the allocator silently let the corruption
//! through to the fallback panic. `std::process::abort()` terminates the
//! process via a signal rather than an ordinary exit, so on Unix this
//! checks `ExitStatus::signal()` is present -- `None` means the child
//! exited normally (including via the fallback panic) rather than being
//! killed by the abort.

use std::env;
use std::process::Command;

const CHILD_ENV: &str = "HALLOC_DEATH_CHILD";

fn expect_child_death(test_name: &str) {
    let exe = env::current_exe().expect("current_exe");
    let status = Command::new(exe)
        .arg("--exact")
        .arg(test_name)
        .arg("--nocapture")
        .env(CHILD_ENV, "1")
        .status()
        .expect("failed to spawn child test process");

    assert!(
        !status.success(),
        "expected {test_name} to abort the process, but it exited successfully"
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert!(
            status.signal().is_some(),
            "expected {test_name} to die from a signal raised by process::abort(), but it exited \
             normally with code {:?} -- this is the fallback panic path, meaning the security \
             check never fired",
            status.code()
        );
    }
}

#[test]
fn redzone_corruption_aborts_on_free() {
    if env::var_os(CHILD_ENV).is_some() {
        let ptr = halloc::allocate(24);
        // SAFETY: `ptr` is ours; writing one byte past the requested size
        // stomps on the trailing redzone this allocator checks on free.
        unsafe {
            ptr.as_ptr().add(24).write(0);
            halloc::free(ptr.as_ptr());
        }
        panic!("expected process abort before free() returned");
    }

    expect_child_death("redzone_corruption_aborts_on_free");
}

#[test]
fn double_free_aborts_on_the_second_free() {
    if env::var_os(CHILD_ENV).is_some() {
        let ptr = halloc::allocate(48);
        // SAFETY: first free is of a live, once-allocated pointer.
        unsafe { halloc::free(ptr.as_ptr()) };
        // SAFETY: second free of the same pointer is the violation under
        // test; the allocator is required to detect and abort on it.
        unsafe { halloc::free(ptr.as_ptr()) };
        panic!("expected process abort on the second free");
    }

    expect_child_death("double_free_aborts_on_the_second_free");
}

#[test]
fn invalid_free_of_a_stack_pointer_aborts() {
    if env::var_os(CHILD_ENV).is_some() {
        let mut local = 0u8;
        // SAFETY: `&mut local` was never returned by this allocator; that is
        // exactly the condition under test.
        unsafe { halloc::free(std::ptr::addr_of_mut!(local)) };
        panic!("expected process abort on an invalid free");
    }

    expect_child_death("invalid_free_of_a_stack_pointer_aborts");
}
