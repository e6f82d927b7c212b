// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The processor as seen from inside a running environment.
//!
//! User code reaches the kernel only through a trap: the syscall instruction,
//! or a memory access the MMU refuses. [`UserCpu`] models exactly those entry
//! points plus the read-only kernel views (UENVS and UVPT/UVPD) that every
//! address space maps above `UTOP`.

use crate::{EnvId, EnvStatus, PteFlags, Syscall, UserContext};

/// Why a user-level operation did not complete inline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trapped {
    /// The kernel redirected this environment into its page-fault upcall.
    /// The stack pointer addresses a [`crate::UTrapframe`].
    Upcall,
    /// The calling environment no longer owns the CPU: it blocked, yielded to
    /// another environment, or was destroyed. The operation resumes (or is
    /// abandoned) when the environment is next dispatched.
    Descheduled,
}

/// Snapshot of one environment-table slot as exposed read-only at UENVS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvInfo {
    /// Current id of the slot.
    pub id: EnvId,
    /// Creator's id.
    pub parent_id: EnvId,
    /// Scheduling state.
    pub status: EnvStatus,
    /// Dispatch counter.
    pub runs: u32,
    /// Registered page-fault upcall, or 0.
    pub pgfault_upcall: u32,
    /// Waiting in `ipc_recv`.
    pub ipc_recving: bool,
    /// Sender of the last delivered message.
    pub ipc_from: EnvId,
    /// Value of the last delivered message.
    pub ipc_value: u32,
    /// Permission of the page transferred with the last message, empty if none.
    pub ipc_perm: PteFlags,
}

/// Trap and memory interface of the processor running the current environment.
pub trait UserCpu {
    /// Executes the syscall trap with `args` in `edx, ecx, ebx, edi, esi` and
    /// returns `eax` once this environment runs again inline.
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> Result<i32, Trapped>;

    /// Reads user memory at `va`.
    fn load(&mut self, va: u32, buf: &mut [u8]) -> Result<(), Trapped>;

    /// Writes user memory at `va`.
    fn store(&mut self, va: u32, data: &[u8]) -> Result<(), Trapped>;

    /// Current user-visible registers.
    fn context(&self) -> UserContext;

    /// Replaces the user-visible registers (the effect of a `popal; popfl; ret` sequence).
    fn set_context(&mut self, ctx: UserContext);

    /// Reads slot `slot` of the environment array.
    fn env_info(&self, slot: usize) -> EnvInfo;

    /// Raw page-table entry for page number `pn` of the running environment, 0 if unmapped.
    fn vpt(&self, pn: u32) -> u32;

    /// Raw page-directory entry `pdx` of the running environment, 0 if no table exists.
    fn vpd(&self, pdx: u32) -> u32;
}
