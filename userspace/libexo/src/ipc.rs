// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rendezvous helpers over `ipc_try_send` / `ipc_recv`.

use exo_abi::memlayout::UTOP;
use exo_abi::{EnvId, PteFlags, UserCpu};

use crate::{syscall, Error, Result};

/// Last message delivered to the calling environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    /// Sender.
    pub from: EnvId,
    /// Message word.
    pub value: u32,
    /// Permission of the transferred page, empty if none came along.
    pub perm: PteFlags,
}

/// Sends `value`, and the page at `page.0` with permission `page.1`, to `to`.
///
/// Yields between attempts while `to` is not receiving. `Err(Descheduled)`
/// means another environment took the CPU; call again once rescheduled.
/// Returns whether the page was transferred.
pub fn send(cpu: &mut dyn UserCpu, to: EnvId, value: u32, page: Option<(u32, PteFlags)>) -> Result<bool> {
    let (src_va, perm) = page.unwrap_or((UTOP, PteFlags::empty()));
    loop {
        match syscall::ipc_try_send(cpu, to, value, src_va, perm) {
            Err(Error::Kernel(exo_abi::Error::IpcNotRecv)) => syscall::yield_now(cpu)?,
            other => return other,
        }
    }
}

/// Waits for a message, accepting a page at `dst_va` if given.
///
/// The environment blocks, so this normally returns once the receive is armed
/// and the CPU has moved on. Read the message with [`received`] after the
/// environment runs again.
pub fn recv(cpu: &mut dyn UserCpu, dst_va: Option<u32>) -> Result<()> {
    match syscall::ipc_recv(cpu, dst_va.unwrap_or(UTOP)) {
        Ok(()) | Err(Error::Descheduled) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Mailbox contents of the calling environment.
pub fn received(cpu: &mut dyn UserCpu) -> Result<Message> {
    let me = syscall::getenvid(cpu)?;
    let info = cpu.env_info(me.slot());
    Ok(Message { from: info.ipc_from, value: info.ipc_value, perm: info.ipc_perm })
}
