// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use exo::hal::Machine;
use exo::mm::PageHandle;
use exo::{Kernel, KernelConfig, ProgramImage, Segment};
use exo_abi::memlayout::{PGSIZE, UTEXT};
use exo_abi::{EnvId, PteFlags};

/// Writable data page of every test program.
pub const DATA: u32 = UTEXT + PGSIZE;

pub fn image() -> ProgramImage {
    ProgramImage {
        entry: UTEXT + 0x40,
        segments: vec![
            Segment { va: UTEXT, data: vec![0x90; 128], mem_len: PGSIZE, writable: false },
            Segment { va: DATA, data: b"initial data".to_vec(), mem_len: PGSIZE, writable: true },
        ],
    }
}

/// Idle env in slot 0, then `n` programs; the first of them is running.
pub fn boot(n: usize) -> (Machine, Vec<EnvId>) {
    let mut kernel = Kernel::new(KernelConfig::default());
    kernel.env_create(&image()).unwrap();
    let ids = (0..n).map(|_| kernel.env_create(&image()).unwrap()).collect();
    let mut machine = Machine::new(kernel);
    machine.boot();
    (machine, ids)
}

pub fn frame_of(m: &Machine, env: EnvId, va: u32) -> Option<(PageHandle, PteFlags)> {
    let space = m.kernel().env(env)?.address_space()?;
    m.kernel().spaces().lookup(space, va)
}

pub fn refcount(m: &Machine, page: PageHandle) -> u32 {
    m.kernel().spaces().refcount(page)
}
