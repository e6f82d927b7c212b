// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Simulated uniprocessor with an MMU and a timer.

use exo_abi::memlayout::{PGSIZE, UTOP};
use exo_abi::trapno::{FEC_PR, FEC_U, FEC_WR, IRQ_OFFSET, IRQ_TIMER, T_PGFLT, T_SYSCALL};
use exo_abi::{EnvId, EnvInfo, PteFlags, Syscall, Trapped, UserContext, UserCpu};

use crate::kernel::{Dispatch, Halt, Kernel};
use crate::mm::PageHandle;
use crate::trap::TrapFrame;

/// Length of the `int $T_SYSCALL` instruction; the saved `eip` points past it.
pub const SYSCALL_INSN_LEN: u32 = 2;

/// What the processor is doing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CpuState {
    /// Not yet booted.
    Reset,
    /// Executing `env` in user mode with `frame` loaded.
    Running {
        /// Environment owning the CPU.
        env: EnvId,
        /// Live register file.
        frame: TrapFrame,
    },
    /// Stopped in the monitor.
    Halted(Halt),
}

/// One CPU plus the kernel it traps into.
pub struct Machine {
    kernel: Kernel,
    cpu: CpuState,
}

impl Machine {
    /// Wraps a kernel whose initial environments are already created.
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel, cpu: CpuState::Reset }
    }

    /// Starts scheduling.
    pub fn boot(&mut self) {
        let dispatch = self.kernel.sched_yield();
        self.apply(dispatch);
    }

    /// The kernel.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Mutable kernel, for setup between traps.
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// Processor state.
    pub fn state(&self) -> &CpuState {
        &self.cpu
    }

    /// Environment executing right now.
    pub fn current(&self) -> Option<EnvId> {
        match &self.cpu {
            CpuState::Running { env, .. } => Some(*env),
            _ => None,
        }
    }

    /// Live register file of the running environment.
    pub fn frame(&self) -> Option<&TrapFrame> {
        match &self.cpu {
            CpuState::Running { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Why the CPU stopped, if it did.
    pub fn halted(&self) -> Option<&Halt> {
        match &self.cpu {
            CpuState::Halted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Delivers a timer interrupt.
    pub fn timer_interrupt(&mut self) {
        self.interrupt(IRQ_TIMER);
    }

    /// Delivers hardware interrupt line `irq`.
    pub fn interrupt(&mut self, irq: u32) {
        self.raise(IRQ_OFFSET + irq, 0, 0);
    }

    /// The running environment executes an instruction raising `trapno`.
    pub fn exception(&mut self, trapno: u32, err: u32) {
        self.raise(trapno, err, 0);
    }

    /// A trap taken while the kernel itself was executing at `eip`.
    pub fn kernel_trap(&mut self, trapno: u32, eip: u32, cr2: u32) {
        let dispatch = self.kernel.trap(TrapFrame::kernel(trapno, eip), cr2);
        self.apply(dispatch);
    }

    /// Delivers timer interrupts until `env` owns the CPU, at most one full round.
    pub fn preempt_until(&mut self, env: EnvId) -> bool {
        for _ in 0..=exo_abi::NENV {
            if self.current() == Some(env) {
                return true;
            }
            if self.current().is_none() {
                return false;
            }
            self.timer_interrupt();
        }
        self.current() == Some(env)
    }

    fn raise(&mut self, trapno: u32, err: u32, cr2: u32) {
        let CpuState::Running { frame, .. } = &self.cpu else {
            return;
        };
        let mut tf = *frame;
        tf.trapno = trapno;
        tf.err = err;
        let dispatch = self.kernel.trap(tf, cr2);
        self.apply(dispatch);
    }

    fn apply(&mut self, dispatch: Dispatch) {
        self.cpu = match dispatch {
            Dispatch::Resume { env, frame } => CpuState::Running { env, frame },
            Dispatch::Halt(reason) => CpuState::Halted(reason),
        };
    }

    /// Raises a page fault for `va` and reports how control came back.
    fn page_fault(&mut self, me: EnvId, va: u32, err: u32) -> Trapped {
        self.raise(T_PGFLT, err, va);
        if self.current() == Some(me) {
            Trapped::Upcall
        } else {
            Trapped::Descheduled
        }
    }

    /// MMU walk for a user access; on refusal returns the `FEC_*` error code.
    fn translate(&self, va: u32, write: bool) -> Result<PageHandle, u32> {
        let mut err = FEC_U;
        if write {
            err |= FEC_WR;
        }
        let space = self.kernel.spaces().active().ok_or(err)?;
        if va >= UTOP {
            return Err(err);
        }
        let (page, flags) = self.kernel.spaces().lookup(space, va).ok_or(err)?;
        let need = if write { PteFlags::USER | PteFlags::WRITABLE } else { PteFlags::USER };
        if !flags.contains(need) {
            return Err(err | FEC_PR);
        }
        Ok(page)
    }

    /// Translates every page of `[va, va + len)`, faulting on the first refusal.
    fn access(&mut self, va: u32, len: usize, write: bool) -> Result<(), Trapped> {
        let me = self.current().ok_or(Trapped::Descheduled)?;
        let mut offset = 0usize;
        while offset < len {
            let cur = va.wrapping_add(offset as u32);
            if let Err(err) = self.translate(cur, write) {
                return Err(self.page_fault(me, cur, err));
            }
            offset += (PGSIZE - cur % PGSIZE) as usize;
        }
        Ok(())
    }
}

impl UserCpu for Machine {
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> Result<i32, Trapped> {
        let CpuState::Running { env, frame } = &mut self.cpu else {
            return Err(Trapped::Descheduled);
        };
        let me = *env;
        frame.regs.eax = num as u32;
        frame.regs.edx = args[0];
        frame.regs.ecx = args[1];
        frame.regs.ebx = args[2];
        frame.regs.edi = args[3];
        frame.regs.esi = args[4];
        frame.eip = frame.eip.wrapping_add(SYSCALL_INSN_LEN);
        self.raise(T_SYSCALL, 0, 0);
        match &self.cpu {
            CpuState::Running { env, frame } if *env == me => Ok(frame.regs.eax as i32),
            _ => Err(Trapped::Descheduled),
        }
    }

    fn load(&mut self, va: u32, buf: &mut [u8]) -> Result<(), Trapped> {
        self.access(va, buf.len(), false)?;
        let space = self.kernel.spaces().active().ok_or(Trapped::Descheduled)?;
        self.kernel.spaces().copy_in(space, va, buf).map_err(|_| Trapped::Descheduled)
    }

    fn store(&mut self, va: u32, data: &[u8]) -> Result<(), Trapped> {
        self.access(va, data.len(), true)?;
        let space = self.kernel.spaces().active().ok_or(Trapped::Descheduled)?;
        self.kernel.spaces_mut().copy_out(space, va, data).map_err(|_| Trapped::Descheduled)
    }

    fn context(&self) -> UserContext {
        self.frame().map_or_else(UserContext::default, |tf| UserContext {
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        })
    }

    fn set_context(&mut self, ctx: UserContext) {
        if let CpuState::Running { frame, .. } = &mut self.cpu {
            frame.regs = ctx.regs;
            frame.eip = ctx.eip;
            frame.eflags = ctx.eflags;
            frame.esp = ctx.esp;
        }
    }

    fn env_info(&self, slot: usize) -> EnvInfo {
        self.kernel.env_info(slot)
    }

    fn vpt(&self, pn: u32) -> u32 {
        let Some(space) = self.kernel.spaces().active() else {
            return 0;
        };
        self.kernel.spaces().pte(space, pn.wrapping_mul(PGSIZE)).map_or(0, |pte| pte.raw())
    }

    fn vpd(&self, pdx: u32) -> u32 {
        let Some(space) = self.kernel.spaces().active() else {
            return 0;
        };
        let table_flags = PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER;
        self.kernel
            .spaces()
            .page_table_frame(space, pdx)
            .map_or(0, |table| table.pa() | table_flags.bits())
    }
}

impl core::fmt::Debug for Machine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Machine").field("cpu", &self.cpu).field("kernel", &self.kernel).finish()
    }
}
