// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-fault handler registration and the upcall trampoline.

use exo_abi::memlayout::{PGSIZE, UTEXT, UXSTACKTOP};
use exo_abi::{EnvId, EnvInfo, PteFlags, Trapped, UTrapframe, UserCpu};

use crate::{syscall, Error, Result};

/// Address the library's upcall entry is linked at.
pub const PGFAULT_UPCALL: u32 = UTEXT;

/// User fault handler. Returning an error terminates the environment.
pub type PgfaultHandler = fn(&mut Process, &mut dyn UserCpu, &UTrapframe) -> Result<()>;

/// Library state of one environment.
///
/// A forked child starts from a copy of its parent's state, exactly as its
/// memory does.
#[derive(Clone, Copy, Default)]
pub struct Process {
    handler: Option<PgfaultHandler>,
}

impl Process {
    /// State of a freshly loaded program.
    pub const fn new() -> Self {
        Self { handler: None }
    }

    /// Registered fault handler.
    pub fn handler(&self) -> Option<PgfaultHandler> {
        self.handler
    }

    /// Installs `handler`; the first call also sets up the exception stack and upcall.
    pub fn set_pgfault_handler(&mut self, cpu: &mut dyn UserCpu, handler: PgfaultHandler) -> Result<()> {
        if self.handler.is_none() {
            let perm = PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE;
            syscall::page_alloc(cpu, EnvId::SELF, UXSTACKTOP - PGSIZE, perm)?;
            syscall::env_set_pgfault_upcall(cpu, EnvId::SELF, PGFAULT_UPCALL)?;
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Kernel view of the calling environment.
    pub fn thisenv(&self, cpu: &mut dyn UserCpu) -> Result<EnvInfo> {
        let id = syscall::getenvid(cpu)?;
        Ok(cpu.env_info(id.slot()))
    }

    /// Reads user memory, servicing page faults through the upcall.
    pub fn load(&mut self, cpu: &mut dyn UserCpu, va: u32, buf: &mut [u8]) -> Result<()> {
        loop {
            match cpu.load(va, buf) {
                Ok(()) => return Ok(()),
                Err(Trapped::Upcall) => self.pgfault_upcall(cpu)?,
                Err(Trapped::Descheduled) => return Err(Error::Descheduled),
            }
        }
    }

    /// Writes user memory, servicing page faults through the upcall.
    pub fn store(&mut self, cpu: &mut dyn UserCpu, va: u32, data: &[u8]) -> Result<()> {
        loop {
            match cpu.store(va, data) {
                Ok(()) => return Ok(()),
                Err(Trapped::Upcall) => self.pgfault_upcall(cpu)?,
                Err(Trapped::Descheduled) => return Err(Error::Descheduled),
            }
        }
    }

    /// Runs at `PGFAULT_UPCALL` with the stack pointer on the fault record.
    fn pgfault_upcall(&mut self, cpu: &mut dyn UserCpu) -> Result<()> {
        let frame_va = cpu.context().esp;
        let mut raw = [0u8; UTrapframe::SIZE as usize];
        self.load(cpu, frame_va, &mut raw)?;
        let utf = UTrapframe::from_le_bytes(&raw);

        let Some(handler) = self.handler else {
            log::error!(target: "libexo", "page fault at {:08x} with no handler", utf.fault_va);
            return exit(cpu, Error::NoHandler { va: utf.fault_va });
        };
        if let Err(err) = handler(self, cpu, &utf) {
            log::error!(target: "libexo", "page fault handler at {:08x}: {err}", utf.fault_va);
            return exit(cpu, err);
        }

        // Push the trap-time eip into the scratch word below the trap-time
        // stack, switch to that stack and return through it.
        let ret_slot = utf.esp.wrapping_sub(4);
        self.store(cpu, ret_slot, &utf.eip.to_le_bytes())?;
        let mut ctx = utf.context();
        ctx.esp = ret_slot;
        cpu.set_context(ctx);

        let mut word = [0u8; 4];
        self.load(cpu, ctx.esp, &mut word)?;
        ctx.eip = u32::from_le_bytes(word);
        ctx.esp += 4;
        cpu.set_context(ctx);
        Ok(())
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process").field("handler", &self.handler.is_some()).finish()
    }
}

/// Terminates the calling environment and reports `err` to whatever is left of it.
fn exit(cpu: &mut dyn UserCpu, err: Error) -> Result<()> {
    if let Err(destroy) = syscall::env_destroy(cpu, EnvId::SELF) {
        log::trace!(target: "libexo", "exit: {destroy}");
    }
    Err(err)
}
