// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed virtual memory layout shared by the kernel and every environment.
//!
//! ```text
//!   ULIM        0xef800000  end of user-readable kernel views
//!   UTOP        0xeec00000  top of user-writable memory
//!   UXSTACKTOP  = UTOP      user exception stack (one page)
//!               guard page
//!   USTACKTOP   UTOP - 2 * PGSIZE
//!   UTEXT       0x00800000  program text
//!   PFTEMP      0x007ff000  scratch page for fault handlers
//!   UTEMP       0x00400000
//! ```

/// Bytes per page.
pub const PGSIZE: u32 = 4096;
/// log2 of [`PGSIZE`].
pub const PGSHIFT: u32 = 12;
/// Bytes mapped by one page table.
pub const PTSIZE: u32 = PGSIZE * 1024;
/// log2 of [`PTSIZE`].
pub const PDXSHIFT: u32 = 22;
/// Entries in one page table or page directory.
pub const NPTENTRIES: u32 = 1024;

/// Upper limit of user-visible memory (read-only kernel views end here).
pub const ULIM: u32 = 0xef80_0000;
/// Top of user-writable memory; the user/kernel boundary for syscalls.
pub const UTOP: u32 = 0xeec0_0000;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the normal user stack, one guard page below the exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;
/// Where user programs are linked.
pub const UTEXT: u32 = 2 * PTSIZE;
/// Temporary mapping area used by the loader.
pub const UTEMP: u32 = PTSIZE;
/// Scratch page used by user-level page fault handlers.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

/// Rounds `va` down to its page base.
pub const fn round_down(va: u32) -> u32 {
    va & !(PGSIZE - 1)
}

/// Rounds `va` up to the next page boundary, saturating at the top of memory.
pub const fn round_up(va: u32) -> u32 {
    match va.checked_add(PGSIZE - 1) {
        Some(v) => v & !(PGSIZE - 1),
        None => u32::MAX & !(PGSIZE - 1),
    }
}

/// Page number of `va`.
pub const fn page_number(va: u32) -> u32 {
    va >> PGSHIFT
}

/// Page-directory index of `va`.
pub const fn pdx(va: u32) -> u32 {
    va >> PDXSHIFT
}

/// Returns `true` when `va` is page aligned.
pub const fn is_page_aligned(va: u32) -> bool {
    va % PGSIZE == 0
}
