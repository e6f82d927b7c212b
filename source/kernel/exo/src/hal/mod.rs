// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware abstraction: the uniprocessor that runs environments
//! OWNERS: @kernel-team
//! PUBLIC API: Machine, CpuState
//! DEPENDS_ON: kernel (trap entry), mm (MMU translation), exo_abi::UserCpu
//! INVARIANTS: The CPU only ever runs the context of the last Dispatch; every trap it
//!             raises goes through Kernel::trap

mod machine;

pub use machine::{CpuState, Machine, SYSCALL_INSN_LEN};
