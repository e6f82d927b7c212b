// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table entry permission bits.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Flags stored in the low bits of a page-table entry.
    pub struct PteFlags: u32 {
        /// Present.
        const PRESENT = 0x001;
        /// Writeable.
        const WRITABLE = 0x002;
        /// Accessible from user mode.
        const USER = 0x004;
        /// Write-through.
        const WRITE_THROUGH = 0x008;
        /// Cache-disable.
        const CACHE_DISABLE = 0x010;
        /// Accessed.
        const ACCESSED = 0x020;
        /// Dirty.
        const DIRTY = 0x040;
        /// Large page.
        const PAGE_SIZE = 0x080;
        /// Global.
        const GLOBAL = 0x100;
        /// Bits left for software; user code may use them freely.
        const AVAIL = 0xe00;
    }
}

impl PteFlags {
    /// Bits a user environment may pass to `page_alloc`, `page_map` and `ipc_try_send`.
    pub const SYSCALL: Self = Self::AVAIL
        .union(Self::PRESENT)
        .union(Self::WRITABLE)
        .union(Self::USER);

    /// Bits every user-supplied permission must carry.
    pub const REQUIRED: Self = Self::PRESENT.union(Self::USER);

    /// Returns `true` when `self` is acceptable as a user-supplied mapping permission.
    pub const fn is_valid_user_perm(self) -> bool {
        self.contains(Self::REQUIRED) && Self::SYSCALL.contains(self)
    }

    /// Decodes a raw register value, keeping unknown bits so validation can reject them.
    pub const fn from_user(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }
}

/// Physical-address portion of a raw page-table entry.
pub const fn pte_addr(raw: u32) -> u32 {
    raw & !0xfff
}
