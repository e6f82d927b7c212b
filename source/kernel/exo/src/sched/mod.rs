// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Round-robin scheduler over the environment table
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Kernel::sched_yield
//! DEPENDS_ON: env
//! INVARIANTS: Slot 0 is the idle environment, chosen only when nothing else is runnable;
//!             the search starts right after the previously dispatched slot

use exo_abi::{EnvStatus, NENV};

use crate::kernel::{Dispatch, Halt, Kernel};

/// Slot reserved for the idle environment.
pub const IDLE_SLOT: usize = 0;

impl Kernel {
    /// Picks the next environment to run. Always ends in a dispatch.
    pub fn sched_yield(&mut self) -> Dispatch {
        match self.pick_next() {
            Some(slot) => self.env_run(slot),
            None => self.halt(Halt::Idle),
        }
    }

    /// Round-robin choice, or `None` when nothing at all can run.
    pub(crate) fn pick_next(&self) -> Option<usize> {
        let runnable = |slot: usize| self.envs.get(slot).status() == EnvStatus::Runnable;
        let start = self.last_run.unwrap_or(IDLE_SLOT);
        // Wrapping all the way around revisits `start` last.
        (1..=NENV)
            .map(|step| (start + step) % NENV)
            .filter(|&slot| slot != IDLE_SLOT)
            .find(|&slot| runnable(slot))
            .or_else(|| runnable(IDLE_SLOT).then_some(IDLE_SLOT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelConfig;
    use exo_abi::EnvId;

    fn kernel_with(states: &[EnvStatus]) -> Kernel {
        let mut kernel = Kernel::new(KernelConfig::default());
        for &status in states {
            let slot = kernel.env_alloc(EnvId::SELF).expect("alloc");
            kernel.envs.get_mut(slot).status = status;
        }
        kernel
    }

    #[test]
    fn skips_blocked_and_idle_slots() {
        use EnvStatus::*;
        let mut kernel = kernel_with(&[Runnable, Runnable, NotRunnable, Runnable]);
        kernel.last_run = Some(1);
        assert_eq!(kernel.pick_next(), Some(3));
    }

    #[test]
    fn wraps_around_past_the_end() {
        use EnvStatus::*;
        let mut kernel = kernel_with(&[Runnable, Runnable, Runnable, NotRunnable]);
        kernel.last_run = Some(2);
        assert_eq!(kernel.pick_next(), Some(1));
    }

    #[test]
    fn reruns_previous_when_it_is_the_only_candidate() {
        use EnvStatus::*;
        let mut kernel = kernel_with(&[Runnable, NotRunnable, Runnable]);
        kernel.last_run = Some(2);
        assert_eq!(kernel.pick_next(), Some(2));
    }

    #[test]
    fn idle_runs_only_when_nothing_else_can() {
        use EnvStatus::*;
        let mut kernel = kernel_with(&[Runnable, NotRunnable, NotRunnable]);
        kernel.last_run = Some(1);
        assert_eq!(kernel.pick_next(), Some(IDLE_SLOT));
    }

    #[test]
    fn first_pick_starts_after_slot_zero() {
        use EnvStatus::*;
        let kernel = kernel_with(&[Runnable, NotRunnable, Runnable]);
        assert_eq!(kernel.pick_next(), Some(2));
    }

    #[test]
    fn empty_table_halts_into_monitor() {
        let mut kernel = kernel_with(&[EnvStatus::NotRunnable]);
        assert_eq!(kernel.sched_yield(), Dispatch::Halt(Halt::Idle));
        assert_eq!(
            kernel.monitor().last(),
            Some(&crate::MonitorEntry::Halt(Halt::Idle))
        );
        assert_eq!(kernel.curenv(), None);
    }

    #[test]
    fn dispatch_counts_runs_and_activates_space() {
        let mut kernel = kernel_with(&[EnvStatus::Runnable, EnvStatus::Runnable]);
        let Dispatch::Resume { env, .. } = kernel.sched_yield() else {
            panic!("expected a runnable environment");
        };
        assert_eq!(env.slot(), 1);
        assert_eq!(kernel.envs().get(1).runs(), 1);
        assert_eq!(kernel.spaces().active(), kernel.envs().get(1).address_space());
    }
}
