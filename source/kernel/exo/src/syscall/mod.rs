// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall decoding and dispatch
//! OWNERS: @kernel-team
//! PUBLIC API: Args, SysResult
//! DEPENDS_ON: syscall::api, ipc, env, exo_abi::Syscall
//! INVARIANTS: Stable syscall numbers; decode/check/execute discipline; errors are returned
//!             as negative codes, pointer violations destroy the caller instead

pub mod api;

use core::ops::ControlFlow;

use exo_abi::{EnvId, Error, Syscall};

use crate::kernel::{Dispatch, Kernel};

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in `edx, ecx, ebx, edi, esi`.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [u32; 5],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [u32; 5]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> u32 {
        self.regs[index]
    }
}

fn encode(result: SysResult<u32>) -> i32 {
    match result {
        Ok(value) => value as i32,
        Err(err) => err.errno(),
    }
}

/// Keeps a dispatch decision, otherwise returns `ret` to the caller.
fn returning(flow: ControlFlow<Dispatch>, ret: i32) -> ControlFlow<Dispatch, i32> {
    match flow {
        ControlFlow::Break(dispatch) => ControlFlow::Break(dispatch),
        ControlFlow::Continue(()) => ControlFlow::Continue(ret),
    }
}

impl Kernel {
    /// Runs syscall `num` for the current environment.
    ///
    /// `Continue` carries the value for the caller's `eax`; `Break` means the
    /// caller gave up the CPU and the dispatch must be applied as is.
    pub(crate) fn syscall(&mut self, num: u32, args: &Args) -> ControlFlow<Dispatch, i32> {
        let Ok(call) = Syscall::try_from(num) else {
            log::debug!(target: "syscall", "unknown syscall {num}");
            return ControlFlow::Continue(Error::Inval.errno());
        };
        log::trace!(target: "syscall", "{call:?} {:x?}", args.regs);

        let result = match call {
            Syscall::Cputs => return self.sys_cputs(args.get(0), args.get(1)),
            Syscall::Cgetc => Ok(self.sys_cgetc()),
            Syscall::GetEnvId => self.sys_getenvid().map(EnvId::raw),
            Syscall::EnvDestroy => return self.sys_env_destroy(EnvId::from_raw(args.get(0))),
            Syscall::Yield => return ControlFlow::Break(self.sys_yield()),
            Syscall::Exofork => self.sys_exofork().map(EnvId::raw),
            Syscall::EnvSetStatus => {
                self.sys_env_set_status(EnvId::from_raw(args.get(0)), args.get(1)).map(|()| 0)
            }
            Syscall::PageAlloc => self.sys_page_alloc(&api::PageAllocArgs::decode(args)).map(|()| 0),
            Syscall::PageMap => self.sys_page_map(&api::PageMapArgs::decode(args)).map(|()| 0),
            Syscall::PageUnmap => self.sys_page_unmap(&api::PageUnmapArgs::decode(args)).map(|()| 0),
            Syscall::EnvSetPgfaultUpcall => self
                .sys_env_set_pgfault_upcall(EnvId::from_raw(args.get(0)), args.get(1))
                .map(|()| 0),
            Syscall::IpcRecv => self.sys_ipc_recv(args.get(0)).map(|()| 0),
            Syscall::IpcTrySend => self.sys_ipc_try_send(&api::IpcSendArgs::decode(args)),
            Syscall::TimeMsec => Ok(self.clock.msec()),
        };
        if let Err(err) = result {
            log::debug!(target: "syscall", "{call:?} -> {err}");
        }
        ControlFlow::Continue(encode(result))
    }
}
