// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frames, two-level page tables and per-environment address spaces
//! OWNERS: @kernel-mm-team
//! PUBLIC API: AddressSpaceManager, AsHandle, PageHandle, MapError, AddressSpaceError
//! DEPENDS_ON: exo_abi::memlayout, exo_abi::PteFlags
//! INVARIANTS: A frame's refcount equals the number of page-table entries (plus page-table
//!             structures) referencing it; a frame returns to the free list exactly at zero

pub mod address_space;
pub mod frame;
pub mod page_table;

pub use address_space::{AddressSpaceError, AddressSpaceManager, AsHandle};
pub use frame::{FrameAllocator, PageHandle};
pub use page_table::{PageTable, Pte};

pub use exo_abi::memlayout::PGSIZE;

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No physical frame left for the page or its page table.
    #[error("out of physical memory")]
    NoMem,
    /// Virtual address was not page aligned.
    #[error("address {0:#010x} is not page aligned")]
    Unaligned(u32),
    /// Mapping would land at or above `UTOP`.
    #[error("address {0:#010x} is outside user space")]
    OutOfRange(u32),
}

impl From<MapError> for exo_abi::Error {
    fn from(value: MapError) -> Self {
        match value {
            MapError::NoMem => Self::NoMem,
            MapError::Unaligned(_) | MapError::OutOfRange(_) => Self::Inval,
        }
    }
}
