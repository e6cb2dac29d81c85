use std::io::{self, Error};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            // SAFETY: sysconf with _SC_PAGESIZE has no preconditions.
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

/// Maps a fresh, anonymous, read-write, page-aligned run of `len` bytes.
///
/// # Safety
///
/// `len` must be non-zero.
pub unsafe fn map_pages(len: usize) -> io::Result<*mut u8> {
    // SAFETY: MAP_ANON | MAP_PRIVATE with a null address and no fd is always
    // well-defined; the caller guarantees `len` is non-zero.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }

    Ok(ptr.cast::<u8>())
}

/// Unmaps a run previously returned by [`map_pages`].
///
/// # Safety
///
/// `ptr`/`len` must describe a mapping currently owned by the caller, obtained
/// from [`map_pages`].
pub unsafe fn unmap_pages(ptr: *mut u8, len: usize) {
    // SAFETY: caller guarantees ptr/len describe a live mapping.
    unsafe {
        libc::munmap(ptr.cast(), len);
    }
}

/// Marks `len` bytes at `ptr` as inaccessible; any subsequent access faults.
///
/// # Safety
///
/// `ptr`/`len` must describe pages currently owned by the caller.
pub unsafe fn protect_none(ptr: *mut u8, len: usize) -> io::Result<()> {
    // SAFETY: caller guarantees ptr/len describe pages it owns.
    let rc = unsafe { libc::mprotect(ptr.cast(), len, libc::PROT_NONE) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Writes a diagnostic message directly to stderr via a raw `write(2)`,
/// bypassing buffered I/O so the message has the best chance of reaching the
/// terminal before the process aborts.
pub fn raw_write_stderr(msg: &[u8]) {
    // SAFETY: msg is a valid, sized byte slice; write(2) on STDERR_FILENO with
    // a correct (ptr, len) pair has no further preconditions. The return
    // value is intentionally ignored: there is nothing useful to do with a
    // failed diagnostic write on the way to an abort.
    unsafe {
        let _ = libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
    }
}
