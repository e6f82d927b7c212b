// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The single owned kernel-state object and the dispatch result type
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, Dispatch, Halt, KernelPanic
//! DEPENDS_ON: env, mm, console, monitor, time
//! INVARIANTS: All mutable kernel state lives here; every trap returns exactly one Dispatch

use core::fmt;

use exo_abi::{EnvId, EnvInfo, EnvStatus};

use crate::config::KernelConfig;
use crate::console::Console;
use crate::env::{Env, EnvTable};
use crate::mm::AddressSpaceManager;
use crate::monitor::{Monitor, MonitorEntry};
use crate::time::Clock;
use crate::trap::TrapFrame;

/// What the outer driver loop does after a kernel entry completes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use = "a dispatch decision must be applied to the CPU"]
pub enum Dispatch {
    /// Restore `frame` and continue executing environment `env` in user mode.
    Resume {
        /// Environment now owning the CPU.
        env: EnvId,
        /// Register file to load.
        frame: TrapFrame,
    },
    /// Stop the CPU and hand control to the monitor.
    Halt(Halt),
}

/// Terminal conditions that drop into the monitor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Halt {
    /// No environment, not even the idle one, is runnable.
    #[error("destroyed all environments - nothing more to do")]
    Idle,
    /// A kernel invariant was violated.
    #[error("kernel panic: {0}")]
    Panic(KernelPanic),
}

/// Kernel-fatal conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KernelPanic {
    /// Page fault while executing kernel code.
    #[error("kernel page fault at va {va:#010x}, eip {eip:#010x}")]
    KernelPageFault {
        /// Faulting address.
        va: u32,
        /// Kernel instruction pointer.
        eip: u32,
    },
    /// Exception in kernel mode with no handler.
    #[error("unhandled trap {trapno} in kernel")]
    UnhandledKernelTrap {
        /// Trap vector.
        trapno: u32,
    },
    /// A dispatch was requested for an environment that is not runnable.
    #[error("env_run of {env} in state {status:?}")]
    NotRunnable {
        /// Environment id.
        env: EnvId,
        /// Its state at the time.
        status: EnvStatus,
    },
    /// A user-mode trap arrived with no current environment.
    #[error("trap {trapno} from user mode with no current environment")]
    NoCurrentEnv {
        /// Trap vector.
        trapno: u32,
    },
}

/// Kernel state: environment table, memory, scheduler cursor and devices.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) envs: EnvTable,
    pub(crate) spaces: AddressSpaceManager,
    /// Slot of the environment that owns the CPU.
    pub(crate) curenv: Option<usize>,
    /// Slot dispatched most recently; the round-robin cursor.
    pub(crate) last_run: Option<usize>,
    pub(crate) console: Console,
    pub(crate) monitor: Monitor,
    pub(crate) clock: Clock,
}

static_assertions::assert_not_impl_any!(Kernel: Send, Sync);

impl Kernel {
    /// Boots an empty kernel: every slot free, all frames available.
    pub fn new(config: KernelConfig) -> Self {
        log::info!(
            target: "env",
            "kernel up: {} envs, {} physical pages, {} ms tick",
            exo_abi::NENV,
            config.phys_pages,
            config.tick_ms
        );
        Self {
            config,
            envs: EnvTable::new(),
            spaces: AddressSpaceManager::new(config.phys_pages),
            curenv: None,
            last_run: None,
            console: Console::default(),
            monitor: Monitor::default(),
            clock: Clock::new(config.tick_ms),
        }
    }

    /// Configuration the kernel booted with.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The environment table.
    pub fn envs(&self) -> &EnvTable {
        &self.envs
    }

    /// Memory manager.
    pub fn spaces(&self) -> &AddressSpaceManager {
        &self.spaces
    }

    /// Mutable memory manager; the MMU writes user memory through it.
    pub fn spaces_mut(&mut self) -> &mut AddressSpaceManager {
        &mut self.spaces
    }

    /// Id of the environment owning the CPU.
    pub fn curenv(&self) -> Option<EnvId> {
        self.curenv.map(|slot| self.envs.get(slot).id())
    }

    /// Live environment with exactly this id.
    pub fn env(&self, id: EnvId) -> Option<&Env> {
        let env = self.envs.get(id.slot());
        (env.status() != EnvStatus::Free && env.id() == id).then_some(env)
    }

    /// Read-only view of slot `slot`, as mapped at UENVS.
    pub fn env_info(&self, slot: usize) -> EnvInfo {
        self.envs.get(slot % exo_abi::NENV).info()
    }

    /// Handle onto the console buffers.
    pub fn console(&self) -> Console {
        self.console.clone()
    }

    /// Monitor entries recorded so far.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Timer ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    /// Stops scheduling and records the halt for the monitor.
    pub(crate) fn halt(&mut self, reason: Halt) -> Dispatch {
        match &reason {
            Halt::Idle => log::info!(target: "sched", "{reason}"),
            Halt::Panic(_) => log::error!(target: "trap", "{reason}"),
        }
        self.curenv = None;
        self.spaces.activate(None);
        self.monitor.enter(MonitorEntry::Halt(reason.clone()));
        Dispatch::Halt(reason)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("curenv", &self.curenv())
            .field("live_envs", &self.envs.live().count())
            .field("free_pages", &self.spaces.free_pages())
            .field("ticks", &self.clock.ticks())
            .finish()
    }
}
