//! C ABI.
//!
//! Registration functions return a [`Status`] code. Event masks are the raw
//! [`EventType`] bits and callbacks receive the fired bit, a pointer to the
//! [`Event`](crate::Event) record and their registration argument.
//!
//! `memhook_orig_*` perform the genuine operation; `memhook_*` dispatch it
//! and are meant to be the targets of the hook installer.

use crate::{dispatch, global, orig};
use libc::{c_int, c_void, off_t};
use memhook_core::{EventType, ForeignCallback, MemHookError, Status};

/// Install `callback` with `arg` for the events in `events`.
///
/// # Safety
///
/// `callback` must be safe to call with any event in `events` from any
/// thread, for as long as it stays registered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_set_event_handler(
    events: u32,
    priority: c_int,
    callback: Option<ForeignCallback>,
    arg: *mut c_void,
) -> c_int {
    let result = match callback {
        Some(callback) => global::global().set_foreign_event_handler(
            EventType::from_bits_retain(events),
            priority,
            callback,
            arg,
        ),
        None => Err(MemHookError::InvalidArgument("null callback")),
    };
    Status::from(result) as c_int
}

/// Remove `events` from the registration of `(callback, arg)`.
///
/// Unknown registrations are ignored.
///
/// # Safety
///
/// Always safe to call; marked unsafe for symmetry with registration.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_unset_event_handler(
    events: u32,
    callback: Option<ForeignCallback>,
    arg: *mut c_void,
) {
    if let (Some(callback), Some(dispatcher)) = (callback, global::try_global()) {
        dispatcher.unset_foreign_event_handler(EventType::from_bits_retain(events), callback, arg);
    }
}

/// Genuine `mmap()`.
///
/// # Safety
///
/// Same contract as `mmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_mmap(
    address: *mut c_void,
    size: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    unsafe { orig::mmap(address, size, prot, flags, fd, offset) }
}

/// Genuine `munmap()`.
///
/// # Safety
///
/// Same contract as `munmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_munmap(address: *mut c_void, size: usize) -> c_int {
    unsafe { orig::munmap(address, size) }
}

/// Genuine `mremap()`.
///
/// # Safety
///
/// Same contract as `mremap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_mremap(
    address: *mut c_void,
    old_size: usize,
    new_size: usize,
    flags: c_int,
) -> *mut c_void {
    unsafe { orig::mremap(address, old_size, new_size, flags) }
}

/// Genuine `shmat()`.
///
/// # Safety
///
/// Same contract as `shmat(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_shmat(
    shmid: c_int,
    shmaddr: *const c_void,
    shmflg: c_int,
) -> *mut c_void {
    unsafe { orig::shmat(shmid, shmaddr, shmflg) }
}

/// Genuine `shmdt()`.
///
/// # Safety
///
/// Same contract as `shmdt(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_shmdt(shmaddr: *const c_void) -> c_int {
    unsafe { orig::shmdt(shmaddr) }
}

/// Genuine `sbrk()`.
///
/// # Safety
///
/// Same contract as `sbrk(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_orig_sbrk(increment: isize) -> *mut c_void {
    unsafe { orig::sbrk(increment) }
}

/// Dispatching `mmap()`.
///
/// # Safety
///
/// Same contract as `mmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_mmap(
    address: *mut c_void,
    size: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    unsafe { dispatch::mmap(address, size, prot, flags, fd, offset) }
}

/// Dispatching `munmap()`.
///
/// # Safety
///
/// Same contract as `munmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_munmap(address: *mut c_void, size: usize) -> c_int {
    unsafe { dispatch::munmap(address, size) }
}

/// Dispatching `mremap()`.
///
/// # Safety
///
/// Same contract as `mremap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_mremap(
    address: *mut c_void,
    old_size: usize,
    new_size: usize,
    flags: c_int,
) -> *mut c_void {
    unsafe { dispatch::mremap(address, old_size, new_size, flags) }
}

/// Dispatching `shmat()`.
///
/// # Safety
///
/// Same contract as `shmat(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_shmat(
    shmid: c_int,
    shmaddr: *const c_void,
    shmflg: c_int,
) -> *mut c_void {
    unsafe { dispatch::shmat(shmid, shmaddr, shmflg) }
}

/// Dispatching `shmdt()`.
///
/// # Safety
///
/// Same contract as `shmdt(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_shmdt(shmaddr: *const c_void) -> c_int {
    unsafe { dispatch::shmdt(shmaddr) }
}

/// Dispatching `sbrk()`.
///
/// # Safety
///
/// Same contract as `sbrk(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memhook_sbrk(increment: isize) -> *mut c_void {
    unsafe { dispatch::sbrk(increment) }
}
