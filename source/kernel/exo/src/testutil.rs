// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for in-crate tests.

use alloc::{vec, vec::Vec};

use exo_abi::memlayout::{PGSIZE, UTEXT};
use exo_abi::{EnvId, Syscall, UserCpu};

use crate::env::{ProgramImage, Segment};
use crate::hal::Machine;
use crate::{Kernel, KernelConfig};

/// Read-only text page at `UTEXT`, two writable data pages after it.
pub(crate) fn image() -> ProgramImage {
    ProgramImage {
        entry: UTEXT + 0x20,
        segments: vec![
            Segment { va: UTEXT, data: vec![0x90; 64], mem_len: PGSIZE, writable: false },
            Segment {
                va: UTEXT + PGSIZE,
                data: b"initial data".to_vec(),
                mem_len: 2 * PGSIZE,
                writable: true,
            },
        ],
    }
}

/// Boots an idle environment in slot 0 plus `n` environments in slots `1..=n`.
///
/// The first of the returned environments owns the CPU.
pub(crate) fn boot(n: usize) -> (Machine, Vec<EnvId>) {
    let mut kernel = Kernel::new(KernelConfig::default());
    kernel.env_create(&image()).expect("idle env");
    let ids = (0..n).map(|_| kernel.env_create(&image()).expect("env")).collect();
    let mut machine = Machine::new(kernel);
    machine.boot();
    (machine, ids)
}

/// Issues a syscall, treating descheduling as a test failure.
pub(crate) fn sys(m: &mut Machine, num: Syscall, args: [u32; 5]) -> i32 {
    m.syscall(num, args).expect("caller keeps the CPU")
}
