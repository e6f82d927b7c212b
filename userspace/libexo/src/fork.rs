// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write fork built from exofork, page_map and the fault upcall
//! OWNERS: @runtime
//! DEPENDS_ON: syscall, pgfault
//! INVARIANTS: A page writable before fork is never writable in both parent and child;
//!             the child gets its own exception stack and is runnable only once fully set up

use exo_abi::memlayout::{page_number, pdx, round_down, NPTENTRIES, PFTEMP, PGSIZE, USTACKTOP, UXSTACKTOP};
use exo_abi::trapno::FEC_WR;
use exo_abi::{EnvId, EnvStatus, PteFlags, UTrapframe, UserCpu};

use crate::pgfault::Process;
use crate::{syscall, Error, Result};

/// Available-to-user PTE bit marking a copy-on-write page.
pub const PTE_COW: PteFlags = PteFlags::from_bits_retain(0x800);

/// Which side of a fork the caller is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkResult {
    /// In the parent; carries the child's id.
    Parent(EnvId),
    /// In the child.
    Child,
}

fn pte_flags(cpu: &dyn UserCpu, va: u32) -> PteFlags {
    if cpu.vpd(pdx(va)) & PteFlags::PRESENT.bits() == 0 {
        return PteFlags::empty();
    }
    PteFlags::from_user(cpu.vpt(page_number(va)) & PteFlags::SYSCALL.bits())
}

/// Gives the faulting environment a private writable copy of a COW page.
pub fn cow_pgfault(process: &mut Process, cpu: &mut dyn UserCpu, utf: &UTrapframe) -> Result<()> {
    let va = round_down(utf.fault_va);
    if utf.err & FEC_WR == 0 || !pte_flags(cpu, va).contains(PTE_COW) {
        return Err(Error::NotCopyOnWrite { va: utf.fault_va, err: utf.err });
    }
    let perm = PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE;
    syscall::page_alloc(cpu, EnvId::SELF, PFTEMP, perm)?;
    let mut page = [0u8; PGSIZE as usize];
    process.load(cpu, va, &mut page)?;
    process.store(cpu, PFTEMP, &page)?;
    syscall::page_map(cpu, EnvId::SELF, PFTEMP, EnvId::SELF, va, perm)?;
    syscall::page_unmap(cpu, EnvId::SELF, PFTEMP)?;
    log::trace!(target: "libexo", "copied cow page {va:08x}");
    Ok(())
}

/// Maps page `pn` into `child`: writable and COW pages become COW on both sides.
fn duppage(cpu: &mut dyn UserCpu, child: EnvId, pn: u32) -> Result<()> {
    let va = pn * PGSIZE;
    let perm = pte_flags(cpu, va);
    if perm.intersects(PteFlags::WRITABLE | PTE_COW) {
        let cow = perm.difference(PteFlags::WRITABLE).union(PTE_COW);
        // Child first; our own copy may be the stack we are running on.
        syscall::page_map(cpu, EnvId::SELF, va, child, va, cow)?;
        syscall::page_map(cpu, EnvId::SELF, va, EnvId::SELF, va, cow)
    } else {
        syscall::page_map(cpu, EnvId::SELF, va, child, va, perm)
    }
}

/// Shares every user page below the normal stack top with `child`.
fn dup_address_space(cpu: &mut dyn UserCpu, child: EnvId) -> Result<()> {
    let end = page_number(USTACKTOP);
    for table in 0..=pdx(USTACKTOP - 1) {
        if cpu.vpd(table) & PteFlags::PRESENT.bits() == 0 {
            continue;
        }
        let first = table * NPTENTRIES;
        for pn in first..(first + NPTENTRIES).min(end) {
            if PteFlags::from_user(cpu.vpt(pn)).contains(PteFlags::REQUIRED) {
                duppage(cpu, child, pn)?;
            }
        }
    }
    let xstack = PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE;
    syscall::page_alloc(cpu, child, UXSTACKTOP - PGSIZE, xstack)
}

impl Process {
    /// Duplicates the calling environment with copy-on-write sharing.
    ///
    /// The parent sees [`ForkResult::Parent`]. The child resumes from the same
    /// `exofork` trap with a zero return and sees [`ForkResult::Child`].
    pub fn fork(&mut self, cpu: &mut dyn UserCpu) -> Result<ForkResult> {
        self.set_pgfault_handler(cpu, cow_pgfault)?;
        let child = syscall::exofork(cpu)?;
        if child.is_self() {
            return Ok(ForkResult::Child);
        }

        let setup = dup_address_space(cpu, child).and_then(|()| {
            let upcall = self.thisenv(cpu)?.pgfault_upcall;
            syscall::env_set_pgfault_upcall(cpu, child, upcall)?;
            syscall::env_set_status(cpu, child, EnvStatus::Runnable)
        });
        if let Err(err) = setup {
            log::warn!(target: "libexo", "fork of {child} failed: {err}");
            if let Err(destroy) = syscall::env_destroy(cpu, child) {
                log::warn!(target: "libexo", "reaping {child}: {destroy}");
            }
            return Err(err);
        }
        Ok(ForkResult::Parent(child))
    }
}
