//! # memhook-std
//!
//! The memhook engine.
//!
//! This crate provides:
//! - **Registry**: [`Registry`] with lock-free chain snapshots
//! - **Dispatch**: [`Dispatcher`] and its per-primitive entry points
//! - **Gateway**: [`Gateway`], [`SyscallGateway`] and the `raw` functions
//! - **Aggregates**: [`Synthesizer`] and the shared memory [`ShmTable`]
//! - **Configuration**: [`Config`]
//! - **Standard handlers**: Logging, RangeFilter
//! - **Testing**: doubles in [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core types
pub use memhook_core;

// Modules
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod handlers;
pub mod registry;
pub mod shm;
pub mod synth;
pub mod testing;

#[cfg(feature = "inventory")]
pub mod collected;

pub use config::{Config, ConfigBuilder};
pub use dispatch::Dispatcher;
pub use gateway::{Gateway, SyscallGateway};
pub use registry::{HandlerEntry, HandlerRef, ReadGuard, Registry, Snapshot};
pub use shm::ShmTable;
pub use synth::{Aggregates, Synthesizer};

#[cfg(feature = "inventory")]
pub use collected::CollectedHandler;
#[cfg(feature = "inventory")]
pub use inventory;
