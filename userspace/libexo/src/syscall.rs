// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed wrappers over the raw syscall trap.
//!
//! Calls that give up the CPU (`yield_now`, `ipc_recv`, destroying oneself)
//! return [`Error::Descheduled`] when another environment was dispatched.

use exo_abi::{EnvId, EnvStatus, PteFlags, Syscall, UserCpu};

use crate::{Error, Result};

fn call(cpu: &mut dyn UserCpu, num: Syscall, args: [u32; 5]) -> Result<u32> {
    let ret = cpu.syscall(num, args)?;
    match exo_abi::Error::from_errno(ret) {
        Some(err) => Err(Error::Kernel(err)),
        None => Ok(ret as u32),
    }
}

/// Writes `len` bytes at `va` to the console.
pub fn cputs(cpu: &mut dyn UserCpu, va: u32, len: u32) -> Result<()> {
    call(cpu, Syscall::Cputs, [va, len, 0, 0, 0]).map(drop)
}

/// Next console byte, if one is pending.
pub fn cgetc(cpu: &mut dyn UserCpu) -> Result<Option<u8>> {
    let c = call(cpu, Syscall::Cgetc, [0; 5])?;
    Ok((c != 0).then_some(c as u8))
}

/// Id of the calling environment.
pub fn getenvid(cpu: &mut dyn UserCpu) -> Result<EnvId> {
    call(cpu, Syscall::GetEnvId, [0; 5]).map(EnvId::from_raw)
}

/// Destroys `env` (self or a child).
pub fn env_destroy(cpu: &mut dyn UserCpu, env: EnvId) -> Result<()> {
    call(cpu, Syscall::EnvDestroy, [env.raw(), 0, 0, 0, 0]).map(drop)
}

/// Offers the CPU to the next runnable environment.
pub fn yield_now(cpu: &mut dyn UserCpu) -> Result<()> {
    call(cpu, Syscall::Yield, [0; 5]).map(drop)
}

/// Creates a blank child; `EnvId::SELF` means "this is the child".
pub fn exofork(cpu: &mut dyn UserCpu) -> Result<EnvId> {
    call(cpu, Syscall::Exofork, [0; 5]).map(EnvId::from_raw)
}

/// Sets `env` RUNNABLE or NOT_RUNNABLE.
pub fn env_set_status(cpu: &mut dyn UserCpu, env: EnvId, status: EnvStatus) -> Result<()> {
    call(cpu, Syscall::EnvSetStatus, [env.raw(), status as u32, 0, 0, 0]).map(drop)
}

/// Registers the page-fault entry point of `env`; 0 clears it.
pub fn env_set_pgfault_upcall(cpu: &mut dyn UserCpu, env: EnvId, entry: u32) -> Result<()> {
    call(cpu, Syscall::EnvSetPgfaultUpcall, [env.raw(), entry, 0, 0, 0]).map(drop)
}

/// Maps a fresh zero page at `va` in `env`.
pub fn page_alloc(cpu: &mut dyn UserCpu, env: EnvId, va: u32, perm: PteFlags) -> Result<()> {
    call(cpu, Syscall::PageAlloc, [env.raw(), va, perm.bits(), 0, 0]).map(drop)
}

/// Shares the page at `src_va` in `src` into `dst` at `dst_va`.
pub fn page_map(
    cpu: &mut dyn UserCpu,
    src: EnvId,
    src_va: u32,
    dst: EnvId,
    dst_va: u32,
    perm: PteFlags,
) -> Result<()> {
    call(cpu, Syscall::PageMap, [src.raw(), src_va, dst.raw(), dst_va, perm.bits()]).map(drop)
}

/// Removes the mapping at `va` in `env`.
pub fn page_unmap(cpu: &mut dyn UserCpu, env: EnvId, va: u32) -> Result<()> {
    call(cpu, Syscall::PageUnmap, [env.raw(), va, 0, 0, 0]).map(drop)
}

/// One send attempt. `Ok(true)` when a page went along with the value.
pub fn ipc_try_send(
    cpu: &mut dyn UserCpu,
    to: EnvId,
    value: u32,
    src_va: u32,
    perm: PteFlags,
) -> Result<bool> {
    call(cpu, Syscall::IpcTrySend, [to.raw(), value, src_va, perm.bits(), 0]).map(|sent| sent == 1)
}

/// Blocks until a message arrives; `dst_va >= UTOP` refuses pages.
pub fn ipc_recv(cpu: &mut dyn UserCpu, dst_va: u32) -> Result<()> {
    call(cpu, Syscall::IpcRecv, [dst_va, 0, 0, 0, 0]).map(drop)
}

/// Milliseconds since boot.
pub fn time_msec(cpu: &mut dyn UserCpu) -> Result<u32> {
    call(cpu, Syscall::TimeMsec, [0; 5])
}
