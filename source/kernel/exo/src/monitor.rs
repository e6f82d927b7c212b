// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Entry points into the kernel monitor.
//!
//! The interactive monitor itself lives outside the kernel core; the kernel
//! only records each time it would have dropped into it, with the context the
//! monitor would inspect.

use alloc::vec::Vec;

use exo_abi::EnvId;

use crate::kernel::Halt;
use crate::trap::TrapFrame;

/// One entry into the monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorEntry {
    /// Breakpoint or debug exception; the environment resumes afterwards.
    Breakpoint {
        /// Trapping environment, if the trap came from user mode.
        env: Option<EnvId>,
        /// Trap-time registers.
        frame: TrapFrame,
    },
    /// The kernel stopped scheduling.
    Halt(Halt),
}

/// Log of monitor entries.
#[derive(Clone, Debug, Default)]
pub struct Monitor {
    entries: Vec<MonitorEntry>,
}

impl Monitor {
    /// Records an entry.
    pub(crate) fn enter(&mut self, entry: MonitorEntry) {
        self.entries.push(entry);
    }

    /// Entries in the order they happened.
    pub fn entries(&self) -> &[MonitorEntry] {
        &self.entries
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&MonitorEntry> {
        self.entries.last()
    }
}
