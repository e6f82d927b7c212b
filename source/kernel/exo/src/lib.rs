// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

//! CONTEXT: exo kernel core: environments, traps, syscalls, IPC, scheduling
//! OWNERS: @kernel-team
//! STATUS: Functional
//! PUBLIC API: Kernel, KernelConfig, Dispatch, Halt, hal::Machine, env::ProgramImage
//! DEPENDS_ON: exo-abi, log, thiserror, spin, bitflags, static_assertions
//! INVARIANTS: One logical CPU; every kernel entry ends in exactly one Dispatch;
//!             physical pages are freed only when their last mapping goes away

extern crate alloc;

pub mod config;
pub mod console;
pub mod env;
pub mod hal;
pub mod ipc;
mod kernel;
pub mod mm;
pub mod monitor;
pub mod sched;
pub mod syscall;
pub mod time;
pub mod trap;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::KernelConfig;
pub use console::Console;
pub use env::{Env, EnvTable, IpcState, LoadError, ProgramImage, Segment};
pub use kernel::{Dispatch, Halt, Kernel, KernelPanic};
pub use monitor::{Monitor, MonitorEntry};
pub use trap::TrapFrame;

pub use exo_abi::{EnvId, EnvStatus, Error, PteFlags};
