//! The original-call gateway.
//!
//! A [`Gateway`] performs the genuine memory primitives without going through
//! any handler chain. The engine calls it at most once per dispatch; handlers
//! use it when they want to perform the real operation themselves.
//!
//! [`SyscallGateway`] is the default. On 64-bit Linux it issues the system
//! calls directly, so interposed libc symbols can never route it back into
//! the engine, and it is async-signal-safe. `sbrk` has no system call and is
//! emulated on top of `brk`.

use libc::{c_int, c_void, off_t};
use memhook_core::{Event, FAILED};

/// Direct access to the genuine memory primitives.
///
/// Implementations must be async-signal-safe, must not allocate and must
/// never dispatch events.
pub trait Gateway: Send + Sync + 'static {
    /// Genuine `mmap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `mmap(2)`.
    unsafe fn mmap(
        &self,
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void;

    /// Genuine `munmap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `munmap(2)`.
    unsafe fn munmap(&self, address: *mut c_void, size: usize) -> c_int;

    /// Genuine `mremap()`.
    ///
    /// # Safety
    ///
    /// Same contract as `mremap(2)`.
    unsafe fn mremap(
        &self,
        address: *mut c_void,
        old_size: usize,
        new_size: usize,
        flags: c_int,
    ) -> *mut c_void;

    /// Genuine `shmat()`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmat(2)`.
    unsafe fn shmat(&self, shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void;

    /// Genuine `shmdt()`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmdt(2)`.
    unsafe fn shmdt(&self, shmaddr: *const c_void) -> c_int;

    /// Genuine `sbrk()`.
    ///
    /// # Safety
    ///
    /// Same contract as `sbrk(2)`.
    unsafe fn sbrk(&self, increment: isize) -> *mut c_void;

    /// Size in bytes of shared memory segment `shmid`, if it exists.
    fn shm_segment_size(&self, shmid: c_int) -> Option<usize>;

    /// The system page size.
    fn page_size(&self) -> usize {
        raw::page_size()
    }

    /// The current program break, or [`FAILED`] if it cannot be queried.
    fn program_break(&self) -> *mut c_void {
        // SAFETY: a zero increment leaves the break where it is.
        unsafe { self.sbrk(0) }
    }
}

/// Perform the operation described by a native `event` through `gateway`
/// unless its result was already produced.
///
/// Returns `true` if the gateway was called. Aggregate events are ignored.
///
/// # Safety
///
/// The event parameters must satisfy the contract of the primitive.
pub unsafe fn perform<G: Gateway + ?Sized>(gateway: &G, event: &mut Event) -> bool {
    // SAFETY: forwarded to the caller.
    unsafe {
        match event {
            Event::Mmap(e) => e.complete_with(|e| {
                gateway.mmap(e.address, e.size, e.prot, e.flags, e.fd, e.offset)
            }),
            Event::Munmap(e) => e.complete_with(|e| gateway.munmap(e.address, e.size)),
            Event::Mremap(e) => {
                e.complete_with(|e| gateway.mremap(e.address, e.old_size, e.new_size, e.flags))
            }
            Event::Shmat(e) => e.complete_with(|e| gateway.shmat(e.shmid, e.shmaddr, e.shmflg)),
            Event::Shmdt(e) => e.complete_with(|e| gateway.shmdt(e.shmaddr)),
            Event::Sbrk(e) => e.complete_with(|e| gateway.sbrk(e.increment)),
            Event::VmMapped(_) | Event::VmUnmapped(_) => false,
        }
    }
}

/// The default gateway, backed by [`raw`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallGateway;

impl Gateway for SyscallGateway {
    unsafe fn mmap(
        &self,
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        unsafe { raw::mmap(address, size, prot, flags, fd, offset) }
    }

    unsafe fn munmap(&self, address: *mut c_void, size: usize) -> c_int {
        unsafe { raw::munmap(address, size) }
    }

    unsafe fn mremap(
        &self,
        address: *mut c_void,
        old_size: usize,
        new_size: usize,
        flags: c_int,
    ) -> *mut c_void {
        unsafe { raw::mremap(address, old_size, new_size, flags) }
    }

    unsafe fn shmat(&self, shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void {
        unsafe { raw::shmat(shmid, shmaddr, shmflg) }
    }

    unsafe fn shmdt(&self, shmaddr: *const c_void) -> c_int {
        unsafe { raw::shmdt(shmaddr) }
    }

    unsafe fn sbrk(&self, increment: isize) -> *mut c_void {
        unsafe { raw::sbrk(increment) }
    }

    fn shm_segment_size(&self, shmid: c_int) -> Option<usize> {
        raw::shm_segment_size(shmid)
    }
}

/// Genuine primitives as free functions.
#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
pub mod raw {
    use super::FAILED;
    use libc::{c_int, c_long, c_void, off_t};

    fn set_errno(errno: c_int) {
        // SAFETY: `__errno_location` returns the calling thread's errno slot.
        unsafe { *libc::__errno_location() = errno };
    }

    /// `mmap` system call.
    ///
    /// # Safety
    ///
    /// Same contract as `mmap(2)`.
    pub unsafe fn mmap(
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        // Variadic arguments are passed as full-width longs.
        unsafe {
            libc::syscall(
                libc::SYS_mmap,
                address as c_long,
                size as c_long,
                prot as c_long,
                flags as c_long,
                fd as c_long,
                offset as c_long,
            ) as *mut c_void
        }
    }

    /// `munmap` system call.
    ///
    /// # Safety
    ///
    /// Same contract as `munmap(2)`.
    pub unsafe fn munmap(address: *mut c_void, size: usize) -> c_int {
        unsafe { libc::syscall(libc::SYS_munmap, address as c_long, size as c_long) as c_int }
    }

    /// `mremap` system call.
    ///
    /// # Safety
    ///
    /// Same contract as `mremap(2)`. `MREMAP_FIXED` is not supported since
    /// no target address is passed.
    pub unsafe fn mremap(
        address: *mut c_void,
        old_size: usize,
        new_size: usize,
        flags: c_int,
    ) -> *mut c_void {
        unsafe {
            libc::syscall(
                libc::SYS_mremap,
                address as c_long,
                old_size as c_long,
                new_size as c_long,
                flags as c_long,
                0 as c_long,
            ) as *mut c_void
        }
    }

    /// `shmat` system call.
    ///
    /// # Safety
    ///
    /// Same contract as `shmat(2)`.
    pub unsafe fn shmat(shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void {
        unsafe {
            libc::syscall(
                libc::SYS_shmat,
                shmid as c_long,
                shmaddr as c_long,
                shmflg as c_long,
            ) as *mut c_void
        }
    }

    /// `shmdt` system call.
    ///
    /// # Safety
    ///
    /// Same contract as `shmdt(2)`.
    pub unsafe fn shmdt(shmaddr: *const c_void) -> c_int {
        unsafe { libc::syscall(libc::SYS_shmdt, shmaddr as c_long) as c_int }
    }

    /// `sbrk` emulated with the `brk` system call.
    ///
    /// Returns the previous break, or [`FAILED`] with `errno` set to
    /// `ENOMEM`.
    ///
    /// # Safety
    ///
    /// Same contract as `sbrk(2)`. The C library's cached break is not
    /// updated.
    pub unsafe fn sbrk(increment: isize) -> *mut c_void {
        let current = unsafe { libc::syscall(libc::SYS_brk, 0 as c_long) } as usize;
        if increment == 0 {
            return current as *mut c_void;
        }
        let Some(target) = current.checked_add_signed(increment) else {
            set_errno(libc::ENOMEM);
            return FAILED;
        };
        let new = unsafe { libc::syscall(libc::SYS_brk, target as c_long) } as usize;
        if new != target {
            set_errno(libc::ENOMEM);
            return FAILED;
        }
        current as *mut c_void
    }

    /// Size of a System V shared memory segment.
    pub fn shm_segment_size(shmid: c_int) -> Option<usize> {
        // SAFETY: all-zero is a valid `shmid_ds`.
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::syscall(
                libc::SYS_shmctl,
                shmid as c_long,
                libc::IPC_STAT as c_long,
                &mut ds as *mut libc::shmid_ds as c_long,
            )
        };
        (rc >= 0).then_some(ds.shm_segsz as usize)
    }

    /// The system page size.
    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as usize,
            _ => 4096,
        }
    }
}

/// Genuine primitives as free functions.
///
/// Without a raw system call path these go through the C library, which an
/// interposing hook installer must leave unpatched.
#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
pub mod raw {
    use super::FAILED;
    use libc::{c_int, c_void, off_t};

    /// C library `mmap`.
    ///
    /// # Safety
    ///
    /// Same contract as `mmap(2)`.
    pub unsafe fn mmap(
        address: *mut c_void,
        size: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        unsafe { libc::mmap(address, size, prot, flags, fd, offset) }
    }

    /// C library `munmap`.
    ///
    /// # Safety
    ///
    /// Same contract as `munmap(2)`.
    pub unsafe fn munmap(address: *mut c_void, size: usize) -> c_int {
        unsafe { libc::munmap(address, size) }
    }

    /// Not available on this platform; always fails.
    ///
    /// # Safety
    ///
    /// Always safe to call.
    pub unsafe fn mremap(
        _address: *mut c_void,
        _old_size: usize,
        _new_size: usize,
        _flags: c_int,
    ) -> *mut c_void {
        FAILED
    }

    /// C library `shmat`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmat(2)`.
    pub unsafe fn shmat(shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void {
        unsafe { libc::shmat(shmid, shmaddr, shmflg) }
    }

    /// C library `shmdt`.
    ///
    /// # Safety
    ///
    /// Same contract as `shmdt(2)`.
    pub unsafe fn shmdt(shmaddr: *const c_void) -> c_int {
        unsafe { libc::shmdt(shmaddr) }
    }

    /// Not available on this platform; always fails.
    ///
    /// # Safety
    ///
    /// Always safe to call.
    pub unsafe fn sbrk(_increment: isize) -> *mut c_void {
        FAILED
    }

    /// Size of a System V shared memory segment.
    pub fn shm_segment_size(shmid: c_int) -> Option<usize> {
        // SAFETY: all-zero is a valid `shmid_ds`.
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) };
        (rc >= 0).then_some(ds.shm_segsz as usize)
    }

    /// The system page size.
    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as usize,
            _ => 4096,
        }
    }
}
