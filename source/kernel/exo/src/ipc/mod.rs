// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous rendezvous IPC with optional page transfer
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Kernel::sys_ipc_try_send, Kernel::sys_ipc_recv (via syscalls)
//! DEPENDS_ON: env, mm, syscall::api
//! INVARIANTS: Send never blocks and succeeds only against a blocked receiver; delivery
//!             clears `receiving` before the receiver is runnable, so one receive gets
//!             exactly one message; a read-only page is never delivered writable

use exo_abi::memlayout::UTOP;
use exo_abi::{EnvStatus, Error, PteFlags};

use crate::kernel::Kernel;
use crate::syscall::api::{check_no_escalation, check_perm, check_va, IpcSendArgs};
use crate::syscall::SysResult;

impl Kernel {
    /// Delivers `value` (and maybe a page) to a waiting receiver.
    ///
    /// Returns 1 when a page was transferred, 0 otherwise. On error the
    /// receiver is left untouched.
    pub(crate) fn sys_ipc_try_send(&mut self, args: &IpcSendArgs) -> SysResult<u32> {
        let cur = self.current()?;
        let dst = self.envs.lookup(args.target, Some(cur), false)?;
        let receiver = self.envs.get(dst);
        if !receiver.ipc().receiving || receiver.status() != EnvStatus::NotRunnable {
            return Err(Error::IpcNotRecv);
        }

        let mut transferred = PteFlags::empty();
        if let (true, Some(dst_va)) = (args.src_va < UTOP, receiver.ipc().dst_va) {
            let src_va = check_va(args.src_va)?;
            let perm = check_perm(args.perm)?;
            let src_space = self.space_of(cur)?;
            let dst_space = self.space_of(dst)?;
            let (page, src_perm) = self.spaces.lookup(src_space, src_va.raw()).ok_or(Error::Inval)?;
            check_no_escalation(perm, src_perm)?;
            self.spaces.unmap(dst_space, dst_va)?;
            self.spaces.map(dst_space, dst_va, page, perm)?;
            transferred = perm;
        }

        let sender = self.envs.get(cur).id();
        let receiver = self.envs.get_mut(dst);
        receiver.ipc.receiving = false;
        receiver.ipc.from = sender;
        receiver.ipc.value = args.value;
        receiver.ipc.perm = transferred;
        receiver.status = EnvStatus::Runnable;
        // Deferred return value of the receiver's ipc_recv.
        receiver.tf.regs.eax = 0;
        log::debug!(
            target: "ipc",
            "{sender} -> {}: value {:#x}, perm {transferred:?}",
            receiver.id,
            args.value
        );
        Ok(u32::from(!transferred.is_empty()))
    }

    /// Blocks the caller until a message arrives. `dst_va >= UTOP` refuses pages.
    pub(crate) fn sys_ipc_recv(&mut self, dst_va: u32) -> SysResult<()> {
        let cur = self.current()?;
        let dst_va = if dst_va < UTOP { Some(check_va(dst_va)?.raw()) } else { None };
        let env = self.envs.get_mut(cur);
        env.ipc.receiving = true;
        env.ipc.dst_va = dst_va;
        env.status = EnvStatus::NotRunnable;
        log::trace!(target: "ipc", "{} waiting, dst {dst_va:x?}", env.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
