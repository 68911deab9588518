//! Registration and removal through the public API.

mod common;

use common::{addr, mock_dispatcher};
use libc::c_void;
use memhook::{
    Config, Dispatcher, Event, EventKind, EventType, MemHookError, Status,
    testing::{CountingHandler, MockGateway},
};
use std::sync::Arc;

fn noop(_: EventType, _: &mut Event, _: *mut c_void) {}

#[test]
fn test_invalid_masks() {
    let dispatcher = mock_dispatcher();
    let err = dispatcher
        .set_event_handler(EventType::empty(), 0, noop, addr(0))
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);

    let err = dispatcher
        .set_event_handler(EventType::from_bits_retain(1 << 30), 0, noop, addr(0))
        .unwrap_err();
    assert_eq!(err, MemHookError::UnknownEvents(1 << 30));
    assert!(dispatcher.registry().is_empty());
}

#[test]
fn test_duplicate_pair_rejected_atomically() {
    let dispatcher = mock_dispatcher();
    dispatcher
        .set_event_handler(EventType::MMAP, 0, noop, addr(1))
        .unwrap();
    let err = dispatcher
        .set_event_handler(EventType::MMAP | EventType::SBRK, 0, noop, addr(1))
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
    assert!(!dispatcher.registry().subscribed(EventKind::Sbrk));
}

#[test]
fn test_unset_never_registered_is_noop() {
    let dispatcher = mock_dispatcher();
    dispatcher.unset_event_handler(EventType::all(), noop, addr(9));
    dispatcher
        .set_event_handler(EventType::MUNMAP, 0, noop, addr(1))
        .unwrap();
    dispatcher.unset_event_handler(EventType::MUNMAP, noop, addr(2));
    assert_eq!(dispatcher.registry().chain_len(EventKind::Munmap), 1);
}

#[test]
fn test_partial_unset_keeps_other_bits() {
    let dispatcher = mock_dispatcher();
    let counter = Arc::new(CountingHandler::new());
    let handler: Arc<dyn memhook::Handler> = counter.clone();
    dispatcher
        .register_handler(EventType::MMAP | EventType::SBRK, -1, handler.clone())
        .unwrap();
    dispatcher.unregister_handler(EventType::MMAP, &handler);

    common::map_anon(&dispatcher, 4096);
    unsafe { dispatcher.sbrk(8) };
    assert_eq!(counter.count(), 1);

    dispatcher.unregister_handler(EventType::SBRK, &handler);
    assert!(dispatcher.registry().is_empty());
}

#[test]
fn test_config_restricts_registration() {
    let config = Config::builder()
        .events(EventType::MMAP | EventType::VM_MAPPED)
        .build();
    let dispatcher = Dispatcher::with_config(MockGateway::new(), config);
    assert!(
        dispatcher
            .set_event_handler(EventType::MMAP | EventType::VM_MAPPED, 0, noop, addr(0))
            .is_ok()
    );
    assert_eq!(
        dispatcher
            .set_event_handler(EventType::MUNMAP, 0, noop, addr(0))
            .unwrap_err()
            .status(),
        Status::Unsupported
    );

    let disabled = Dispatcher::with_config(
        MockGateway::new(),
        Config::builder().enable_events(false).build(),
    );
    let counter = Arc::new(CountingHandler::new());
    assert_eq!(
        disabled.register_handler(EventType::MMAP, 0, counter.clone()),
        Err(MemHookError::Unsupported(EventType::MMAP))
    );
    // Dispatch still performs the operation.
    assert_ne!(common::map_anon(&disabled, 4096), memhook::FAILED);
    assert_eq!(disabled.gateway().calls(EventKind::Mmap), 1);
}

#[test]
fn test_static_handlers() {
    static COUNTER: CountingHandler = CountingHandler::new();
    let dispatcher = mock_dispatcher();
    dispatcher
        .register_static(EventType::SHMDT, 0, &COUNTER)
        .unwrap();
    assert!(
        dispatcher
            .register_static(EventType::SHMDT, 1, &COUNTER)
            .is_err()
    );
    unsafe { dispatcher.shmdt(addr(0x9000)) };
    dispatcher.unregister_static(EventType::SHMDT, &COUNTER);
    unsafe { dispatcher.shmdt(addr(0x9000)) };
    assert_eq!(COUNTER.count(), 1);
}

#[test]
fn test_clear_and_introspection() {
    let dispatcher = mock_dispatcher();
    dispatcher
        .set_event_handler(EventType::NATIVE, -2, noop, addr(1))
        .unwrap();
    dispatcher
        .set_event_handler(EventType::VM_MAPPED, 2, noop, addr(2))
        .unwrap();
    assert_eq!(dispatcher.registry().len(), 2);
    assert_eq!(dispatcher.registry().chain_len(EventKind::Shmat), 1);
    assert!(dispatcher.registry().subscribed(EventKind::VmMapped));
    assert!(!dispatcher.registry().subscribed(EventKind::VmUnmapped));

    dispatcher.clear();
    dispatcher.synchronize();
    assert!(dispatcher.registry().is_empty());
}
