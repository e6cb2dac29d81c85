use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_NOACCESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

pub fn page_size() -> usize {
    // SAFETY: GetSystemInfo with a zeroed, correctly sized SYSTEM_INFO has no
    // further preconditions.
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            4096
        } else {
            size
        }
    }
}

/// Maps a fresh, anonymous, read-write, page-aligned run of `len` bytes.
///
/// # Safety
///
/// `len` must be non-zero.
pub unsafe fn map_pages(len: usize) -> io::Result<*mut u8> {
    // SAFETY: a null address request with MEM_COMMIT | MEM_RESERVE lets the
    // OS pick the address; the caller guarantees `len` is non-zero.
    let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

    if ptr.is_null() {
        return Err(Error::last_os_error());
    }

    Ok(ptr.cast::<u8>())
}

/// Unmaps a run previously returned by [`map_pages`].
///
/// # Safety
///
/// `ptr` must describe a mapping currently owned by the caller, obtained from
/// [`map_pages`]; `VirtualFree` with `MEM_RELEASE` requires the original base
/// address and ignores `len`.
pub unsafe fn unmap_pages(ptr: *mut u8, _len: usize) {
    // SAFETY: caller guarantees ptr is a live VirtualAlloc base address.
    unsafe {
        VirtualFree(ptr.cast::<std::ffi::c_void>(), 0, MEM_RELEASE);
    }
}

/// Marks `len` bytes at `ptr` as inaccessible; any subsequent access faults.
///
/// # Safety
///
/// `ptr`/`len` must describe pages currently owned by the caller.
pub unsafe fn protect_none(ptr: *mut u8, len: usize) -> io::Result<()> {
    let mut old_protect: u32 = 0;
    // SAFETY: caller guarantees ptr/len describe pages it owns.
    let ok = unsafe {
        VirtualProtect(
            ptr.cast::<std::ffi::c_void>(),
            len,
            PAGE_NOACCESS,
            &mut old_protect,
        )
    };
    if ok == 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Writes a diagnostic message directly to the process's standard error
/// handle, bypassing buffered I/O.
pub fn raw_write_stderr(msg: &[u8]) {
    use windows_sys::Win32::System::Console::{GetStdHandle, WriteConsoleA, STD_ERROR_HANDLE};

    // SAFETY: GetStdHandle/WriteConsoleA with a valid (ptr, len) pair and a
    // null lpReserved have no further preconditions. The return value is
    // intentionally ignored, matching the Unix raw-write path.
    unsafe {
        let handle: HANDLE = GetStdHandle(STD_ERROR_HANDLE);
        let mut written: u32 = 0;
        let _ = WriteConsoleA(
            handle,
            msg.as_ptr(),
            msg.len() as u32,
            &mut written,
            ptr::null(),
        );
    }
}
