// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for validated syscall operands
//! OWNERS: @kernel-team
//! PUBLIC API: UserVa
//! INVARIANTS: A UserVa is always page aligned and below UTOP

use core::fmt;

use exo_abi::memlayout::{is_page_aligned, UTOP};

/// Page-aligned user virtual address below `UTOP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserVa(u32);

impl UserVa {
    /// Accepts `addr` if it is page aligned and below `UTOP`.
    #[inline]
    pub fn page_aligned(addr: u32) -> Option<Self> {
        if addr < UTOP && is_page_aligned(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the raw address.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserVa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_abi::memlayout::{PGSIZE, UTEXT};

    #[test]
    fn rejects_unaligned_and_kernel_addresses() {
        assert_eq!(UserVa::page_aligned(UTEXT).map(UserVa::raw), Some(UTEXT));
        assert!(UserVa::page_aligned(UTEXT + 1).is_none());
        assert!(UserVa::page_aligned(UTOP).is_none());
        assert!(UserVa::page_aligned(UTOP - PGSIZE).is_some());
    }
}
