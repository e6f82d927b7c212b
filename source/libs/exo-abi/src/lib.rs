// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI between the exo kernel and user environments
//! OWNERS: @runtime
//! PUBLIC API: Error, EnvId, EnvStatus, Syscall, PteFlags, memlayout, PushRegs, UTrapframe, UserCpu
//! DEPENDS_ON: no_std, bitflags, thiserror
//! INVARIANTS: Error codes are small negative integers in eax; EnvId = (generation << 12) | slot;
//!             UTrapframe is 13 little-endian words; syscall numbers are stable

pub mod cpu;
pub mod memlayout;
pub mod pte;
pub mod trapframe;

pub use cpu::{EnvInfo, Trapped, UserCpu};
pub use pte::PteFlags;
pub use trapframe::{PushRegs, UTrapframe, UserContext};

/// Result type returned by ABI helpers.
pub type Result<T> = core::result::Result<T, Error>;

/// Caller-visible error taxonomy. Syscalls return `-(code)` in `eax`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum Error {
    /// Unspecified or unknown problem.
    #[error("unspecified error")]
    Unspecified = 1,
    /// Environment does not exist or the caller may not touch it.
    #[error("bad environment")]
    BadEnv = 2,
    /// Invalid parameter.
    #[error("invalid parameter")]
    Inval = 3,
    /// Request failed due to memory shortage.
    #[error("out of memory")]
    NoMem = 4,
    /// Attempt to create an environment beyond the table capacity.
    #[error("out of environments")]
    NoFreeEnv = 5,
    /// Memory fault.
    #[error("segmentation fault")]
    Fault = 6,
    /// Target environment is not waiting in `ipc_recv`.
    #[error("env is not recving")]
    IpcNotRecv = 7,
}

impl Error {
    /// Returns the negative register encoding of this error.
    pub const fn errno(self) -> i32 {
        -(self as i32)
    }

    /// Decodes a negative syscall return value. Non-negative values are successes.
    pub const fn from_errno(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Unspecified),
            -2 => Some(Self::BadEnv),
            -3 => Some(Self::Inval),
            -4 => Some(Self::NoMem),
            -5 => Some(Self::NoFreeEnv),
            -6 => Some(Self::Fault),
            -7 => Some(Self::IpcNotRecv),
            v if v < 0 => Some(Self::Unspecified),
            _ => None,
        }
    }
}

/// Number of bits used by the slot index inside an [`EnvId`].
pub const LOG2NENV: u32 = 10;
/// Capacity of the environment table.
pub const NENV: usize = 1 << LOG2NENV;
/// Shift of the generation counter inside an [`EnvId`].
pub const ENVGENSHIFT: u32 = 12;

/// Versioned environment handle: `(generation << ENVGENSHIFT) | slot`.
///
/// The raw value `0` is the caller-relative alias for "self".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(u32);

impl EnvId {
    /// Alias for the calling environment.
    pub const SELF: Self = Self(0);

    /// Wraps a raw register value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the register encoding.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for the "self" alias.
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Table slot addressed by this handle.
    pub const fn slot(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    /// Generation bits of this handle (slot bits masked off).
    pub const fn generation(self) -> u32 {
        self.0 & !((1 << ENVGENSHIFT) - 1)
    }

    /// Computes the id a slot receives when it is reused after holding `previous`.
    ///
    /// The generation never wraps to zero or to a value that reads as a negative
    /// register, so a fresh id is never the self alias or an error code.
    pub const fn next_for_slot(previous: Self, slot: usize) -> Self {
        let mut generation = previous.0.wrapping_add(1 << ENVGENSHIFT) & !((NENV as u32) - 1);
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        Self(generation | slot as u32)
    }
}

impl core::fmt::Display for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling state of an environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    /// On the free list.
    #[default]
    Free = 0,
    /// Eligible for scheduling.
    Runnable = 1,
    /// Blocked; currently only by `ipc_recv` or by its parent.
    NotRunnable = 2,
    /// Being torn down.
    Dying = 3,
}

impl TryFrom<u32> for EnvStatus {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::Runnable),
            2 => Ok(Self::NotRunnable),
            3 => Ok(Self::Dying),
            _ => Err(Error::Inval),
        }
    }
}

/// Stable syscall numbers. Arguments travel in `edx, ecx, ebx, edi, esi`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    /// `cputs(ptr, len)`.
    Cputs = 0,
    /// `cgetc() -> byte`.
    Cgetc = 1,
    /// `getenvid() -> EnvId`.
    GetEnvId = 2,
    /// `env_destroy(envid)`.
    EnvDestroy = 3,
    /// `yield()`.
    Yield = 4,
    /// `exofork() -> EnvId` (0 in the child).
    Exofork = 5,
    /// `env_set_status(envid, status)`.
    EnvSetStatus = 6,
    /// `page_alloc(envid, va, perm)`.
    PageAlloc = 7,
    /// `page_map(srcenv, srcva, dstenv, dstva, perm)`.
    PageMap = 8,
    /// `page_unmap(envid, va)`.
    PageUnmap = 9,
    /// `env_set_pgfault_upcall(envid, entry)`.
    EnvSetPgfaultUpcall = 10,
    /// `ipc_recv(dstva)`.
    IpcRecv = 11,
    /// `ipc_try_send(envid, value, srcva, perm)`.
    IpcTrySend = 12,
    /// `time_msec() -> u32`.
    TimeMsec = 13,
}

impl TryFrom<u32> for Syscall {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::Cputs,
            1 => Self::Cgetc,
            2 => Self::GetEnvId,
            3 => Self::EnvDestroy,
            4 => Self::Yield,
            5 => Self::Exofork,
            6 => Self::EnvSetStatus,
            7 => Self::PageAlloc,
            8 => Self::PageMap,
            9 => Self::PageUnmap,
            10 => Self::EnvSetPgfaultUpcall,
            11 => Self::IpcRecv,
            12 => Self::IpcTrySend,
            13 => Self::TimeMsec,
            _ => return Err(Error::Inval),
        })
    }
}

/// Trap vector numbers.
pub mod trapno {
    /// Divide error.
    pub const T_DIVIDE: u32 = 0;
    /// Debug exception.
    pub const T_DEBUG: u32 = 1;
    /// Non-maskable interrupt.
    pub const T_NMI: u32 = 2;
    /// Breakpoint.
    pub const T_BRKPT: u32 = 3;
    /// Overflow.
    pub const T_OFLOW: u32 = 4;
    /// Bounds check.
    pub const T_BOUND: u32 = 5;
    /// Illegal opcode.
    pub const T_ILLOP: u32 = 6;
    /// Device not available.
    pub const T_DEVICE: u32 = 7;
    /// Double fault.
    pub const T_DBLFLT: u32 = 8;
    /// Invalid task switch segment.
    pub const T_TSS: u32 = 10;
    /// Segment not present.
    pub const T_SEGNP: u32 = 11;
    /// Stack exception.
    pub const T_STACK: u32 = 12;
    /// General protection fault.
    pub const T_GPFLT: u32 = 13;
    /// Page fault.
    pub const T_PGFLT: u32 = 14;
    /// Floating point error.
    pub const T_FPERR: u32 = 16;
    /// Alignment check.
    pub const T_ALIGN: u32 = 17;
    /// Machine check.
    pub const T_MCHK: u32 = 18;
    /// SIMD floating point error.
    pub const T_SIMDERR: u32 = 19;
    /// System call vector.
    pub const T_SYSCALL: u32 = 48;
    /// First hardware IRQ vector.
    pub const IRQ_OFFSET: u32 = 32;
    /// Timer IRQ line.
    pub const IRQ_TIMER: u32 = 0;
    /// Keyboard IRQ line.
    pub const IRQ_KBD: u32 = 1;
    /// Serial IRQ line.
    pub const IRQ_SERIAL: u32 = 4;
    /// Spurious IRQ line.
    pub const IRQ_SPURIOUS: u32 = 7;

    /// Page-fault error code: fault on a present page (protection violation).
    pub const FEC_PR: u32 = 0x1;
    /// Page-fault error code: fault caused by a write.
    pub const FEC_WR: u32 = 0x2;
    /// Page-fault error code: fault raised in user mode.
    pub const FEC_U: u32 = 0x4;
}
