// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment creation, teardown and dispatch.

use core::ops::ControlFlow;

use exo_abi::{EnvId, EnvStatus, Error};

use super::{IpcState, LoadError, ProgramImage};
use crate::kernel::{Dispatch, Halt, Kernel, KernelPanic};
use crate::trap::TrapFrame;

impl Kernel {
    /// Pulls a slot off the free list and gives it an empty address space.
    ///
    /// The new environment is RUNNABLE with a fresh user frame; the caller
    /// sets its entry point.
    pub(crate) fn env_alloc(&mut self, parent: EnvId) -> Result<usize, Error> {
        let slot = self.envs.peek_free().ok_or(Error::NoFreeEnv)?;
        let space = self.spaces.create().map_err(|_| Error::NoMem)?;
        let taken = self.envs.take_free();
        debug_assert_eq!(taken, Some(slot));

        let env = self.envs.get_mut(slot);
        env.id = EnvId::next_for_slot(env.id, slot);
        env.parent_id = parent;
        env.status = EnvStatus::Runnable;
        env.runs = 0;
        env.address_space = Some(space);
        env.tf = TrapFrame::user_initial();
        env.pgfault_upcall = None;
        env.ipc = IpcState::default();

        let id = env.id;
        log::info!(target: "env", "[{parent}] new env {id}");
        Ok(slot)
    }

    /// Creates an environment running `image`, parented to nobody.
    pub fn env_create(&mut self, image: &ProgramImage) -> Result<EnvId, LoadError> {
        let slot = self.env_alloc(EnvId::SELF)?;
        if let Err(err) = self.load_icode(slot, image) {
            log::warn!(target: "loader", "load failed: {err}");
            self.env_free(slot);
            return Err(err);
        }
        Ok(self.envs.get(slot).id())
    }

    /// Releases every user page, the address space and the slot.
    pub(crate) fn env_free(&mut self, slot: usize) {
        let cur = self.curenv();
        let env = self.envs.get_mut(slot);
        env.status = EnvStatus::Dying;
        let id = env.id;
        let space = env.address_space.take();

        if self.curenv == Some(slot) {
            self.spaces.activate(None);
        }
        if let Some(space) = space {
            if let Err(err) = self.spaces.destroy(space) {
                log::error!(target: "env", "[{id}] address space teardown: {err}");
            }
        }

        let env = self.envs.get_mut(slot);
        env.pgfault_upcall = None;
        env.ipc = IpcState::default();
        env.status = EnvStatus::Free;
        self.envs.release(slot);
        match cur {
            Some(cur) => log::info!(target: "env", "[{cur}] free env {id}"),
            None => log::info!(target: "env", "[00000000] free env {id}"),
        }
    }

    /// Frees `slot`; if it owned the CPU, schedules someone else.
    pub(crate) fn env_destroy(&mut self, slot: usize) -> ControlFlow<Dispatch> {
        let was_current = self.curenv == Some(slot);
        self.env_free(slot);
        if was_current {
            self.curenv = None;
            ControlFlow::Break(self.sched_yield())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Makes `slot` the running environment and returns its context to resume.
    pub(crate) fn env_run(&mut self, slot: usize) -> Dispatch {
        let env = self.envs.get(slot);
        if env.status() != EnvStatus::Runnable {
            let panic = KernelPanic::NotRunnable { env: env.id(), status: env.status() };
            return self.halt(Halt::Panic(panic));
        }
        self.curenv = Some(slot);
        self.last_run = Some(slot);
        let env = self.envs.get_mut(slot);
        env.runs = env.runs.wrapping_add(1);
        let (id, frame, space) = (env.id, env.tf, env.address_space);
        self.spaces.activate(space);
        log::trace!(target: "sched", "run {id} eip {:#010x}", frame.eip);
        Dispatch::Resume { env: id, frame }
    }
}
