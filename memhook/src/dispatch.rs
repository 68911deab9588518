//! Dispatch entry points for the hook installer.
//!
//! Each function has the shape of the primitive it replaces. Until the
//! global dispatcher exists the genuine operation is performed directly.

use crate::{global::try_global, orig};
use libc::{c_int, c_void, off_t};

/// Dispatching `mmap()`.
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
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.mmap(address, size, prot, flags, fd, offset),
            None => orig::mmap(address, size, prot, flags, fd, offset),
        }
    }
}

/// Dispatching `munmap()`.
///
/// # Safety
///
/// Same contract as `munmap(2)`.
pub unsafe fn munmap(address: *mut c_void, size: usize) -> c_int {
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.munmap(address, size),
            None => orig::munmap(address, size),
        }
    }
}

/// Dispatching `mremap()`.
///
/// # Safety
///
/// Same contract as `mremap(2)`.
pub unsafe fn mremap(
    address: *mut c_void,
    old_size: usize,
    new_size: usize,
    flags: c_int,
) -> *mut c_void {
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.mremap(address, old_size, new_size, flags),
            None => orig::mremap(address, old_size, new_size, flags),
        }
    }
}

/// Dispatching `shmat()`.
///
/// # Safety
///
/// Same contract as `shmat(2)`.
pub unsafe fn shmat(shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void {
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.shmat(shmid, shmaddr, shmflg),
            None => orig::shmat(shmid, shmaddr, shmflg),
        }
    }
}

/// Dispatching `shmdt()`.
///
/// # Safety
///
/// Same contract as `shmdt(2)`.
pub unsafe fn shmdt(shmaddr: *const c_void) -> c_int {
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.shmdt(shmaddr),
            None => orig::shmdt(shmaddr),
        }
    }
}

/// Dispatching `sbrk()`.
///
/// # Safety
///
/// Same contract as `sbrk(2)`.
pub unsafe fn sbrk(increment: isize) -> *mut c_void {
    unsafe {
        match try_global() {
            Some(dispatcher) => dispatcher.sbrk(increment),
            None => orig::sbrk(increment),
        }
    }
}
