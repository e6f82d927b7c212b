// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed syscall handlers: decode raw registers, check them, then execute.

use alloc::vec;
use core::ops::ControlFlow;

use exo_abi::{EnvId, EnvStatus, Error, PteFlags};

use super::{Args, SysResult};
use crate::kernel::{Dispatch, Kernel};
use crate::mm::AsHandle;
use crate::types::UserVa;

/// Validates a page address supplied by user code.
pub(crate) fn check_va(raw: u32) -> SysResult<UserVa> {
    UserVa::page_aligned(raw).ok_or(Error::Inval)
}

/// Validates a mapping permission supplied by user code.
pub(crate) fn check_perm(perm: PteFlags) -> SysResult<PteFlags> {
    if perm.is_valid_user_perm() {
        Ok(perm)
    } else {
        Err(Error::Inval)
    }
}

/// Rejects a writable request against a read-only source mapping.
pub(crate) fn check_no_escalation(requested: PteFlags, source: PteFlags) -> SysResult<()> {
    if requested.contains(PteFlags::WRITABLE) && !source.contains(PteFlags::WRITABLE) {
        return Err(Error::Inval);
    }
    Ok(())
}

/// `page_alloc(envid, va, perm)`.
#[derive(Clone, Copy, Debug)]
pub struct PageAllocArgs {
    /// Target environment.
    pub target: EnvId,
    /// Destination address.
    pub va: u32,
    /// Requested permission.
    pub perm: PteFlags,
}

impl PageAllocArgs {
    /// Decodes the register pack.
    pub fn decode(args: &Args) -> Self {
        Self {
            target: EnvId::from_raw(args.get(0)),
            va: args.get(1),
            perm: PteFlags::from_user(args.get(2)),
        }
    }

    /// Validates address and permission.
    pub fn check(&self) -> SysResult<(UserVa, PteFlags)> {
        Ok((check_va(self.va)?, check_perm(self.perm)?))
    }
}

/// `page_map(srcenv, srcva, dstenv, dstva, perm)`.
#[derive(Clone, Copy, Debug)]
pub struct PageMapArgs {
    /// Source environment.
    pub src: EnvId,
    /// Source address.
    pub src_va: u32,
    /// Destination environment.
    pub dst: EnvId,
    /// Destination address.
    pub dst_va: u32,
    /// Requested permission.
    pub perm: PteFlags,
}

impl PageMapArgs {
    /// Decodes the register pack.
    pub fn decode(args: &Args) -> Self {
        Self {
            src: EnvId::from_raw(args.get(0)),
            src_va: args.get(1),
            dst: EnvId::from_raw(args.get(2)),
            dst_va: args.get(3),
            perm: PteFlags::from_user(args.get(4)),
        }
    }

    /// Validates both addresses and the permission.
    pub fn check(&self) -> SysResult<(UserVa, UserVa, PteFlags)> {
        Ok((check_va(self.src_va)?, check_va(self.dst_va)?, check_perm(self.perm)?))
    }
}

/// `page_unmap(envid, va)`.
#[derive(Clone, Copy, Debug)]
pub struct PageUnmapArgs {
    /// Target environment.
    pub target: EnvId,
    /// Address to unmap.
    pub va: u32,
}

impl PageUnmapArgs {
    /// Decodes the register pack.
    pub fn decode(args: &Args) -> Self {
        Self { target: EnvId::from_raw(args.get(0)), va: args.get(1) }
    }
}

/// `ipc_try_send(envid, value, srcva, perm)`.
#[derive(Clone, Copy, Debug)]
pub struct IpcSendArgs {
    /// Receiver.
    pub target: EnvId,
    /// Message word.
    pub value: u32,
    /// Page to transfer; `>= UTOP` sends none.
    pub src_va: u32,
    /// Permission for the transferred page.
    pub perm: PteFlags,
}

impl IpcSendArgs {
    /// Decodes the register pack.
    pub fn decode(args: &Args) -> Self {
        Self {
            target: EnvId::from_raw(args.get(0)),
            value: args.get(1),
            src_va: args.get(2),
            perm: PteFlags::from_user(args.get(3)),
        }
    }
}

impl Kernel {
    /// Slot of the calling environment.
    pub(crate) fn current(&self) -> SysResult<usize> {
        self.curenv.ok_or(Error::BadEnv)
    }

    pub(crate) fn space_of(&self, slot: usize) -> SysResult<AsHandle> {
        self.envs.get(slot).address_space().ok_or(Error::BadEnv)
    }

    /// Prints `len` bytes at `ptr` to the console; a bad pointer kills the caller.
    pub(crate) fn sys_cputs(&mut self, ptr: u32, len: u32) -> ControlFlow<Dispatch, i32> {
        let (cur, space) = match self.current().and_then(|cur| Ok((cur, self.space_of(cur)?))) {
            Ok(found) => found,
            Err(err) => return ControlFlow::Continue(err.errno()),
        };
        let id = self.envs.get(cur).id();
        let user = PteFlags::PRESENT | PteFlags::USER;
        if let Err(va) = self.spaces.user_mem_check(space, ptr, len, user) {
            log::warn!(target: "syscall", "[{id}] user_mem_check assertion failure for va {va:08x}");
            let flow = self.env_destroy(cur);
            return super::returning(flow, Error::Fault.errno());
        }
        let mut buf = vec![0u8; len as usize];
        if self.spaces.copy_in(space, ptr, &mut buf).is_err() {
            return ControlFlow::Continue(Error::Fault.errno());
        }
        self.console.write(&buf);
        ControlFlow::Continue(0)
    }

    /// Next console byte, 0 when none is pending.
    pub(crate) fn sys_cgetc(&mut self) -> u32 {
        self.console.getc().map_or(0, u32::from)
    }

    pub(crate) fn sys_getenvid(&self) -> SysResult<EnvId> {
        Ok(self.envs.get(self.current()?).id())
    }

    pub(crate) fn sys_env_destroy(&mut self, target: EnvId) -> ControlFlow<Dispatch, i32> {
        let slot = match self.envs.lookup(target, self.curenv, true) {
            Ok(slot) => slot,
            Err(err) => return ControlFlow::Continue(err.errno()),
        };
        let id = self.envs.get(slot).id();
        match self.curenv() {
            Some(cur) if cur == id => log::info!(target: "env", "[{id}] exiting gracefully"),
            Some(cur) => log::info!(target: "env", "[{cur}] destroying {id}"),
            None => {}
        }
        let flow = self.env_destroy(slot);
        super::returning(flow, 0)
    }

    /// Gives up the CPU; the caller later resumes with `eax == 0`.
    pub(crate) fn sys_yield(&mut self) -> Dispatch {
        if let Some(cur) = self.curenv {
            self.envs.get_mut(cur).tf.regs.eax = 0;
        }
        self.sched_yield()
    }

    /// Allocates a NOT_RUNNABLE child whose registers copy the caller's, with `eax == 0`.
    pub(crate) fn sys_exofork(&mut self) -> SysResult<EnvId> {
        let cur = self.current()?;
        let parent = self.envs.get(cur);
        let (parent_id, frame) = (parent.id(), *parent.frame());
        let slot = self.env_alloc(parent_id)?;
        let child = self.envs.get_mut(slot);
        child.status = EnvStatus::NotRunnable;
        child.tf = frame;
        child.tf.regs.eax = 0;
        Ok(child.id())
    }

    pub(crate) fn sys_env_set_status(&mut self, target: EnvId, status: u32) -> SysResult<()> {
        let status = match EnvStatus::try_from(status) {
            Ok(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
            _ => return Err(Error::Inval),
        };
        let slot = self.envs.lookup(target, self.curenv, true)?;
        self.envs.get_mut(slot).status = status;
        Ok(())
    }

    pub(crate) fn sys_env_set_pgfault_upcall(&mut self, target: EnvId, entry: u32) -> SysResult<()> {
        let slot = self.envs.lookup(target, self.curenv, true)?;
        self.envs.get_mut(slot).pgfault_upcall = (entry != 0).then_some(entry);
        Ok(())
    }

    /// Maps a fresh zero page; nothing is allocated unless every check passes.
    pub(crate) fn sys_page_alloc(&mut self, args: &PageAllocArgs) -> SysResult<()> {
        let slot = self.envs.lookup(args.target, self.curenv, true)?;
        let (va, perm) = args.check()?;
        let space = self.space_of(slot)?;
        let page = self.spaces.allocate_page()?;
        if let Err(err) = self.spaces.map(space, va.raw(), page, perm) {
            self.spaces.free_page(page);
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn sys_page_map(&mut self, args: &PageMapArgs) -> SysResult<()> {
        let src = self.envs.lookup(args.src, self.curenv, true)?;
        let dst = self.envs.lookup(args.dst, self.curenv, true)?;
        let (src_va, dst_va, perm) = args.check()?;
        let (src_space, dst_space) = (self.space_of(src)?, self.space_of(dst)?);
        let (page, src_perm) = self.spaces.lookup(src_space, src_va.raw()).ok_or(Error::Inval)?;
        check_no_escalation(perm, src_perm)?;
        self.spaces.map(dst_space, dst_va.raw(), page, perm)?;
        Ok(())
    }

    pub(crate) fn sys_page_unmap(&mut self, args: &PageUnmapArgs) -> SysResult<()> {
        let slot = self.envs.lookup(args.target, self.curenv, true)?;
        let va = check_va(args.va)?;
        let space = self.space_of(slot)?;
        self.spaces.unmap(space, va.raw())?;
        Ok(())
    }
}
