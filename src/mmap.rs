//! Thin wrappers over the OS memory-mapping primitives the pool consumes.
//!
//! Nothing here is specific to this crate's page format; it's the narrow
//! slice of `mmap`/`mprotect`/`munmap`/page-size query the spec calls out as
//! an external collaborator, kept in one place so the rest of the crate
//! never touches `libc` directly.

use std::sync::OnceLock;

/// Returns the OS page size in bytes, querying `sysconf` once and caching
/// the result for the life of the process.
///
/// Asserts the page size is a power of two no larger than `JIT_PAGE_SIZE`,
/// mirroring blink's `GetSystemPageSize`. Without this, a huge-page-only
/// target whose real OS page size exceeds `JIT_PAGE_SIZE` would make every
/// `JitPage::commit` round `start` down to 0 forever: `mprotect` would never
/// run and staged hooks would sit at the sentinel permanently with no
/// diagnostic at all, rather than failing loudly the way a programmer/
/// environment error is supposed to.
pub(crate) fn os_page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        debug_assert!(n > 0, "sysconf(_SC_PAGESIZE) failed");
        let pagesize = n.max(1) as usize;
        debug_assert!(pagesize.is_power_of_two(), "OS page size is not a power of two");
        debug_assert!(
            pagesize <= crate::config::JIT_PAGE_SIZE,
            "OS page size {pagesize} exceeds JIT_PAGE_SIZE {}; increase JIT_PAGE_SIZE",
            crate::config::JIT_PAGE_SIZE
        );
        pagesize
    })
}

/// Outcome of requesting a fresh page at a hinted address.
pub(crate) enum MapOutcome {
    /// Mapped successfully at the returned address.
    Mapped(*mut u8),
    /// Something else already occupies the hinted address; the caller
    /// should advance its hint and retry.
    Occupied,
    /// A genuine, non-recoverable failure. The pool disables itself.
    Failed,
}

/// Requests `len` bytes of fresh, anonymous, private, read-write memory at
/// `hint`, using a "fixed but don't replace an existing mapping" mode where
/// the platform offers one so that address collisions are reported instead
/// of silently overwriting someone else's mapping.
///
/// # Safety
/// `hint` must be page-aligned and `len` a multiple of the OS page size;
/// both hold for every caller in this crate (pages are `JIT_PAGE_SIZE`,
/// itself a multiple of the OS page size).
pub(crate) unsafe fn map_rw(hint: usize, len: usize) -> MapOutcome {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | fixed_noreplace_flag();
    let ptr = unsafe {
        libc::mmap(
            hint as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr != libc::MAP_FAILED {
        return MapOutcome::Mapped(ptr as *mut u8);
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    if errno == libc::EEXIST {
        MapOutcome::Occupied
    } else {
        MapOutcome::Failed
    }
}

/// Re-protects `[addr, addr+len)` as read-execute. On every OS we support
/// this is also where an AArch64 instruction-cache flush for the freshly
/// written bytes gets performed, which is why a page must never be published
/// to a hook before this call returns successfully.
///
/// # Safety
/// `[addr, addr+len)` must lie entirely within a single mapping previously
/// returned by [`map_rw`] and must not be concurrently written by another
/// thread.
pub(crate) unsafe fn protect_exec(addr: *mut u8, len: usize) -> bool {
    let rc = unsafe {
        libc::mprotect(
            addr as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_EXEC,
        )
    };
    rc == 0
}

/// Unmaps a region previously returned by [`map_rw`].
///
/// # Safety
/// `addr`/`len` must describe a mapping this crate owns exclusively, and
/// there must be no outstanding hook that could still dereference it.
pub(crate) unsafe fn unmap(addr: *mut u8, len: usize) {
    unsafe {
        libc::munmap(addr as *mut libc::c_void, len);
    }
}

#[cfg(target_os = "linux")]
fn fixed_noreplace_flag() -> libc::c_int {
    // Not all libc versions on all Linux targets export this constant even
    // though the kernel has supported it since 4.17; fall back to a plain
    // hint (the EEXIST-retry loop then degrades to relying on the kernel
    // never handing back an address we didn't ask for, which in practice
    // means we just trust the brk-tracking cursor).
    #[allow(unused_unsafe)]
    const MAP_FIXED_NOREPLACE: libc::c_int = 0x100000;
    MAP_FIXED_NOREPLACE
}

#[cfg(not(target_os = "linux"))]
fn fixed_noreplace_flag() -> libc::c_int {
    0
}

/// Address of a function inside this crate, used as a stand-in for the
/// "end of the program image" anchor blink derives from its own `_end`
/// linker symbol. Threaded code calls back into the same binary's
/// statically-linked handlers, so keeping the pool's placement hint close to
/// wherever *this* code was loaded serves the same purpose.
pub(crate) fn image_anchor() -> usize {
    image_anchor as usize
}
