// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment table: fixed arena of process control blocks plus free list
//! OWNERS: @kernel-team
//! PUBLIC API: EnvTable, Env, IpcState, ProgramImage, Segment, LoadError
//! DEPENDS_ON: exo_abi::EnvId, mm::AsHandle, trap::TrapFrame
//! INVARIANTS: Live ids are unique; a slot's generation bumps on every reuse so stale ids
//!             fail lookup; only self or the immediate parent may manipulate an environment

mod lifecycle;
mod loader;

use alloc::{collections::VecDeque, vec::Vec};
use core::marker::PhantomData;

use exo_abi::{EnvId, EnvInfo, EnvStatus, Error, PteFlags, ENVGENSHIFT, LOG2NENV, NENV};
use static_assertions::const_assert;

use crate::mm::AsHandle;
use crate::trap::TrapFrame;

pub use loader::{LoadError, ProgramImage, Segment};

const_assert!(ENVGENSHIFT >= LOG2NENV);
const_assert!(NENV.is_power_of_two());

/// Rendezvous mailbox of one environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IpcState {
    /// Blocked in `ipc_recv`.
    pub receiving: bool,
    /// Sender of the last delivered message.
    pub from: EnvId,
    /// Value of the last delivered message.
    pub value: u32,
    /// Where a transferred page should land; `None` refuses pages.
    pub dst_va: Option<u32>,
    /// Permission of the last transferred page, empty if none.
    pub perm: PteFlags,
}

/// Process control block.
#[derive(Clone, Debug, Default)]
pub struct Env {
    pub(crate) tf: TrapFrame,
    pub(crate) id: EnvId,
    pub(crate) parent_id: EnvId,
    pub(crate) status: EnvStatus,
    pub(crate) runs: u32,
    pub(crate) address_space: Option<AsHandle>,
    pub(crate) pgfault_upcall: Option<u32>,
    pub(crate) ipc: IpcState,
}

impl Env {
    /// Current id of this slot.
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// Creator's id.
    pub fn parent_id(&self) -> EnvId {
        self.parent_id
    }

    /// Scheduling state.
    pub fn status(&self) -> EnvStatus {
        self.status
    }

    /// Times dispatched.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Saved register file.
    pub fn frame(&self) -> &TrapFrame {
        &self.tf
    }

    /// Protection domain.
    pub fn address_space(&self) -> Option<AsHandle> {
        self.address_space
    }

    /// Registered page-fault upcall.
    pub fn pgfault_upcall(&self) -> Option<u32> {
        self.pgfault_upcall
    }

    /// IPC mailbox.
    pub fn ipc(&self) -> &IpcState {
        &self.ipc
    }

    /// User-visible view of this slot.
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent_id: self.parent_id,
            status: self.status,
            runs: self.runs,
            pgfault_upcall: self.pgfault_upcall.unwrap_or(0),
            ipc_recving: self.ipc.receiving,
            ipc_from: self.ipc.from,
            ipc_value: self.ipc.value,
            ipc_perm: self.ipc.perm,
        }
    }
}

/// Fixed-capacity arena of environments.
pub struct EnvTable {
    envs: Vec<Env>,
    free: VecDeque<usize>,
    _not_send_sync: PhantomData<*mut ()>,
}

impl EnvTable {
    /// Creates a table with every slot free; slot 0 is handed out first.
    pub fn new() -> Self {
        let mut envs = Vec::with_capacity(NENV);
        envs.resize_with(NENV, Env::default);
        Self { envs, free: (0..NENV).collect(), _not_send_sync: PhantomData }
    }

    /// Slot `slot`.
    pub fn get(&self, slot: usize) -> &Env {
        &self.envs[slot]
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> &mut Env {
        &mut self.envs[slot]
    }

    /// Resolves `id` to a slot on behalf of the environment in slot `current`.
    ///
    /// `EnvId::SELF` names the caller. With `checkperm` the target must be the
    /// caller or one of its immediate children.
    pub fn lookup(&self, id: EnvId, current: Option<usize>, checkperm: bool) -> Result<usize, Error> {
        if id.is_self() {
            return current.ok_or(Error::BadEnv);
        }
        let slot = id.slot();
        let env = &self.envs[slot];
        if env.status == EnvStatus::Free || env.id != id {
            return Err(Error::BadEnv);
        }
        if checkperm {
            let cur = current.ok_or(Error::BadEnv)?;
            if slot != cur && env.parent_id != self.envs[cur].id {
                return Err(Error::BadEnv);
            }
        }
        Ok(slot)
    }

    /// Next slot [`EnvTable::take_free`] would return.
    pub(crate) fn peek_free(&self) -> Option<usize> {
        self.free.front().copied()
    }

    pub(crate) fn take_free(&mut self) -> Option<usize> {
        self.free.pop_front()
    }

    /// Returns `slot` to the head of the free list.
    pub(crate) fn release(&mut self, slot: usize) {
        debug_assert_eq!(self.envs[slot].status, EnvStatus::Free);
        self.free.push_front(slot);
    }

    /// Number of free slots.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Iterates `(slot, env)` over environments that are not free.
    pub fn live(&self) -> impl Iterator<Item = (usize, &Env)> + '_ {
        self.envs.iter().enumerate().filter(|(_, env)| env.status != EnvStatus::Free)
    }
}

impl Default for EnvTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
