// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-level exokernel library: syscall stubs, page-fault upcalls, COW fork, IPC
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - Process: per-environment library state (fault handler, fork)
//!   - fork::cow_pgfault: copy-on-write fault handler
//!   - ipc::{send, recv, received}: rendezvous helpers
//!   - syscall: typed wrappers over the raw trap
//!
//! DEPENDENCIES:
//!   - exo-abi: UserCpu trap interface, memory layout, error codes
//!
//! INVARIANTS: The library never assumes it keeps the CPU across a trap; every
//!             operation that can lose it reports `Error::Descheduled`

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod fork;
pub mod ipc;
mod pgfault;
pub mod syscall;

pub use fork::{ForkResult, PTE_COW};
pub use pgfault::{PgfaultHandler, Process, PGFAULT_UPCALL};

use exo_abi::Trapped;

/// Result type returned by library operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures seen by user code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The kernel rejected a syscall.
    #[error(transparent)]
    Kernel(#[from] exo_abi::Error),
    /// The environment gave up the CPU before the operation finished.
    #[error("descheduled")]
    Descheduled,
    /// The copy-on-write handler saw a fault it does not own.
    #[error("fault at {va:#010x} (err {err:#x}) is not a write to a copy-on-write page")]
    NotCopyOnWrite {
        /// Faulting address.
        va: u32,
        /// `FEC_*` error code.
        err: u32,
    },
    /// An upcall arrived but no handler is registered.
    #[error("page fault at {va:#010x} with no handler registered")]
    NoHandler {
        /// Faulting address.
        va: u32,
    },
}

impl From<Trapped> for Error {
    fn from(_: Trapped) -> Self {
        Self::Descheduled
    }
}
