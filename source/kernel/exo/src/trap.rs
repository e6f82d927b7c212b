// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap frame layout and the single kernel entry point
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, EFlags, trapname, Kernel::trap
//! DEPENDS_ON: syscall, sched, env, mm
//! INVARIANTS: User-mode traps are snapshotted into curenv before dispatch; the user
//!             fault record is pushed only onto a mapped, writable exception stack

use core::fmt;
use core::ops::ControlFlow;

use bitflags::bitflags;
use exo_abi::memlayout::{round_down, PGSIZE, USTACKTOP, UXSTACKTOP};
use exo_abi::trapno::*;
use exo_abi::{EnvStatus, PteFlags, PushRegs, UTrapframe};

use crate::kernel::{Dispatch, Halt, Kernel, KernelPanic};
use crate::monitor::MonitorEntry;
use crate::syscall::Args;

/// Kernel text segment selector.
pub const GD_KT: u16 = 0x08;
/// Kernel data segment selector.
pub const GD_KD: u16 = 0x10;
/// User text segment selector.
pub const GD_UT: u16 = 0x18;
/// User data segment selector.
pub const GD_UD: u16 = 0x20;
/// Requested privilege level of user selectors.
pub const RPL_USER: u16 = 3;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Processor flags register.
    pub struct EFlags: u32 {
        /// Carry.
        const CF = 0x0000_0001;
        /// Parity.
        const PF = 0x0000_0004;
        /// Zero.
        const ZF = 0x0000_0040;
        /// Trap (single step).
        const TF = 0x0000_0100;
        /// Interrupts enabled.
        const IF = 0x0000_0200;
        /// I/O privilege level.
        const IOPL_MASK = 0x0000_3000;
    }
}

/// Register file captured on every kernel entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// General-purpose registers.
    pub regs: PushRegs,
    /// Extra segment.
    pub es: u16,
    /// Data segment.
    pub ds: u16,
    /// Trap vector.
    pub trapno: u32,
    /// Hardware error code, 0 when the trap has none.
    pub err: u32,
    /// Instruction pointer.
    pub eip: u32,
    /// Code segment; its low two bits are the privilege level.
    pub cs: u16,
    /// Flags.
    pub eflags: u32,
    /// Stack pointer.
    pub esp: u32,
    /// Stack segment.
    pub ss: u16,
}

impl TrapFrame {
    /// Frame a fresh environment starts from: user segments, empty stack, interrupts on.
    pub fn user_initial() -> Self {
        Self {
            ds: GD_UD | RPL_USER,
            es: GD_UD | RPL_USER,
            ss: GD_UD | RPL_USER,
            cs: GD_UT | RPL_USER,
            esp: USTACKTOP,
            eflags: EFlags::IF.bits(),
            ..Self::default()
        }
    }

    /// Frame for a trap taken while the kernel itself was executing.
    pub fn kernel(trapno: u32, eip: u32) -> Self {
        Self { ds: GD_KD, es: GD_KD, ss: GD_KD, cs: GD_KT, trapno, eip, ..Self::default() }
    }

    /// Returns `true` when the trap came from user mode.
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// Symbolic name of a trap vector.
pub fn trapname(trapno: u32) -> &'static str {
    const EXCNAMES: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];
    match trapno {
        n if (n as usize) < EXCNAMES.len() => EXCNAMES[n as usize],
        T_SYSCALL => "System call",
        n if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&n) => "Hardware Interrupt",
        _ => "(unknown trap)",
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.regs;
        writeln!(f, "  edi  {:#010x}", r.edi)?;
        writeln!(f, "  esi  {:#010x}", r.esi)?;
        writeln!(f, "  ebp  {:#010x}", r.ebp)?;
        writeln!(f, "  oesp {:#010x}", r.oesp)?;
        writeln!(f, "  ebx  {:#010x}", r.ebx)?;
        writeln!(f, "  edx  {:#010x}", r.edx)?;
        writeln!(f, "  ecx  {:#010x}", r.ecx)?;
        writeln!(f, "  eax  {:#010x}", r.eax)?;
        writeln!(f, "  es   {:#06x}", self.es)?;
        writeln!(f, "  ds   {:#06x}", self.ds)?;
        writeln!(f, "  trap {:#010x} {}", self.trapno, trapname(self.trapno))?;
        writeln!(f, "  err  {:#010x}", self.err)?;
        writeln!(f, "  eip  {:#010x}", self.eip)?;
        writeln!(f, "  cs   {:#06x}", self.cs)?;
        writeln!(f, "  flag {:#010x}", self.eflags)?;
        if self.from_user() {
            writeln!(f, "  esp  {:#010x}", self.esp)?;
            writeln!(f, "  ss   {:#06x}", self.ss)?;
        }
        Ok(())
    }
}

impl Kernel {
    /// Single entry point for exceptions, interrupts and system calls.
    ///
    /// `cr2` carries the faulting address for page faults.
    pub fn trap(&mut self, tf: TrapFrame, cr2: u32) -> Dispatch {
        if tf.from_user() {
            let Some(cur) = self.curenv else {
                return self.halt(Halt::Panic(KernelPanic::NoCurrentEnv { trapno: tf.trapno }));
            };
            self.envs.get_mut(cur).tf = tf;
        }
        log::trace!(target: "trap", "trap {} ({})", tf.trapno, trapname(tf.trapno));

        if let ControlFlow::Break(dispatch) = self.trap_dispatch(&tf, cr2) {
            return dispatch;
        }

        match self.curenv {
            Some(cur) if self.envs.get(cur).status() == EnvStatus::Runnable => self.env_run(cur),
            _ => self.sched_yield(),
        }
    }

    fn trap_dispatch(&mut self, tf: &TrapFrame, cr2: u32) -> ControlFlow<Dispatch> {
        match tf.trapno {
            T_PGFLT => self.page_fault_handler(tf, cr2),
            T_BRKPT | T_DEBUG => {
                log::info!(target: "trap", "{} at eip {:#010x}", trapname(tf.trapno), tf.eip);
                let env = self.curenv();
                self.monitor.enter(MonitorEntry::Breakpoint { env, frame: *tf });
                ControlFlow::Continue(())
            }
            T_SYSCALL if tf.from_user() => {
                let r = &tf.regs;
                let args = Args::new([r.edx, r.ecx, r.ebx, r.edi, r.esi]);
                match self.syscall(r.eax, &args) {
                    ControlFlow::Continue(ret) => {
                        if let Some(cur) = self.curenv {
                            self.envs.get_mut(cur).tf.regs.eax = ret as u32;
                        }
                        ControlFlow::Continue(())
                    }
                    ControlFlow::Break(dispatch) => ControlFlow::Break(dispatch),
                }
            }
            n if n == IRQ_OFFSET + IRQ_TIMER => {
                self.clock.tick();
                ControlFlow::Break(self.sched_yield())
            }
            n if n == IRQ_OFFSET + IRQ_SPURIOUS => {
                log::warn!(target: "trap", "spurious interrupt on irq 7\n{tf}");
                ControlFlow::Continue(())
            }
            trapno => {
                log::warn!(target: "trap", "unexpected trap\n{tf}");
                if !tf.from_user() {
                    return ControlFlow::Break(
                        self.halt(Halt::Panic(KernelPanic::UnhandledKernelTrap { trapno })),
                    );
                }
                match self.curenv {
                    Some(cur) => self.env_destroy(cur),
                    None => ControlFlow::Continue(()),
                }
            }
        }
    }

    /// Routes a user page fault to the environment's upcall, or destroys it.
    fn page_fault_handler(&mut self, tf: &TrapFrame, fault_va: u32) -> ControlFlow<Dispatch> {
        if !tf.from_user() {
            return ControlFlow::Break(self.halt(Halt::Panic(KernelPanic::KernelPageFault {
                va: fault_va,
                eip: tf.eip,
            })));
        }
        let Some(cur) = self.curenv else {
            return ControlFlow::Continue(());
        };
        let env = self.envs.get(cur);
        let (id, upcall, space) = (env.id(), env.pgfault_upcall(), env.address_space());

        let Some(space) = space else {
            return self.env_destroy(cur);
        };
        let Some(upcall) = upcall else {
            log::warn!(
                target: "trap",
                "[{id}] user fault va {fault_va:08x} ip {:08x}\n{tf}",
                tf.eip
            );
            return self.env_destroy(cur);
        };
        if let Err(va) = self.spaces.user_mem_check(space, round_down(upcall), PGSIZE, PteFlags::PRESENT) {
            log::warn!(target: "trap", "[{id}] page fault upcall {upcall:08x} not mapped (va {va:08x})");
            return self.env_destroy(cur);
        }

        // A fault inside the handler stacks the new record below the current
        // one, leaving one word for the trampoline's return address.
        let utf_va = if (UXSTACKTOP - PGSIZE..UXSTACKTOP).contains(&tf.esp) {
            tf.esp.wrapping_sub(4 + UTrapframe::SIZE)
        } else {
            UXSTACKTOP - UTrapframe::SIZE
        };
        let writable = PteFlags::PRESENT | PteFlags::WRITABLE;
        if let Err(va) = self.spaces.user_mem_check(space, utf_va, UTrapframe::SIZE, writable) {
            log::warn!(target: "trap", "[{id}] exception stack overflow or unmapped at {va:08x}");
            return self.env_destroy(cur);
        }

        let utf = UTrapframe {
            fault_va,
            err: tf.err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        };
        if self.spaces.copy_out(space, utf_va, &utf.to_le_bytes()).is_err() {
            return self.env_destroy(cur);
        }
        log::debug!(target: "trap", "[{id}] page fault at {fault_va:08x} -> upcall, frame {utf_va:08x}");

        let saved = &mut self.envs.get_mut(cur).tf;
        saved.esp = utf_va;
        saved.eip = upcall;
        ControlFlow::Break(self.env_run(cur))
    }
}
