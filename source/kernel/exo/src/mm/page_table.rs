// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level page table whose directory and table pages are real frames.

use alloc::collections::BTreeMap;

use exo_abi::memlayout::{page_number, pdx, PGSHIFT};
use exo_abi::PteFlags;

use super::{FrameAllocator, MapError, PageHandle};

/// Leaf page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    /// Mapped frame.
    pub page: PageHandle,
    /// Permission bits (always includes `PRESENT`).
    pub flags: PteFlags,
}

impl Pte {
    /// Hardware encoding: frame address in the high bits, flags in the low twelve.
    pub fn raw(self) -> u32 {
        self.page.pa() | self.flags.bits()
    }
}

/// Page directory plus lazily allocated page tables.
pub struct PageTable {
    dir: PageHandle,
    tables: BTreeMap<u32, PageHandle>,
    entries: BTreeMap<u32, Pte>,
}

impl PageTable {
    /// Allocates the directory frame of a fresh, empty table.
    pub fn new(frames: &mut FrameAllocator) -> Result<Self, MapError> {
        let dir = frames.alloc()?;
        frames.incref(dir);
        Ok(Self { dir, tables: BTreeMap::new(), entries: BTreeMap::new() })
    }

    /// Frame holding the page directory.
    pub fn dir(&self) -> PageHandle {
        self.dir
    }

    /// Entry mapping the page that contains `va`.
    pub fn lookup(&self, va: u32) -> Option<Pte> {
        self.entries.get(&page_number(va)).copied()
    }

    /// Frame holding page table `index`, if one was allocated.
    pub fn table(&self, index: u32) -> Option<PageHandle> {
        self.tables.get(&index).copied()
    }

    /// Maps `page` at `va`, replacing any previous mapping there.
    ///
    /// The new page gains its reference before the old one is dropped, so
    /// re-inserting the page already mapped at `va` never frees it.
    pub fn insert(
        &mut self,
        frames: &mut FrameAllocator,
        va: u32,
        page: PageHandle,
        flags: PteFlags,
    ) -> Result<(), MapError> {
        self.walk_create(frames, va)?;
        frames.incref(page);
        let pte = Pte { page, flags: flags | PteFlags::PRESENT };
        if let Some(old) = self.entries.insert(page_number(va), pte) {
            frames.decref(old.page);
        }
        Ok(())
    }

    /// Unmaps `va`; returns `false` when nothing was mapped.
    pub fn remove(&mut self, frames: &mut FrameAllocator, va: u32) -> bool {
        match self.entries.remove(&page_number(va)) {
            Some(old) => {
                frames.decref(old.page);
                true
            }
            None => false,
        }
    }

    /// Iterates `(va, entry)` over every mapping in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Pte)> + '_ {
        self.entries.iter().map(|(&pn, &pte)| (pn << PGSHIFT, pte))
    }

    /// Number of leaf mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every mapping, then the table and directory frames.
    pub fn release(self, frames: &mut FrameAllocator) {
        for pte in self.entries.into_values() {
            frames.decref(pte.page);
        }
        for table in self.tables.into_values() {
            frames.decref(table);
        }
        frames.decref(self.dir);
    }

    fn walk_create(&mut self, frames: &mut FrameAllocator, va: u32) -> Result<(), MapError> {
        let index = pdx(va);
        if !self.tables.contains_key(&index) {
            let table = frames.alloc()?;
            frames.incref(table);
            self.tables.insert(index, table);
        }
        Ok(())
    }
}
