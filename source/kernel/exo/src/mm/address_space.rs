// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-environment address spaces over a shared pool of reference-counted frames.
//!
//! Every address space implicitly shares the kernel half above `UTOP`; only the
//! user half is tracked here. The read-only kernel views that user code sees
//! above `UTOP` are served by [`crate::hal::Machine`].

use alloc::vec::Vec;
use core::num::NonZeroU32;

use exo_abi::memlayout::{is_page_aligned, round_down, round_up, PGSIZE, UTOP};
use exo_abi::PteFlags;

use super::{FrameAllocator, MapError, PageHandle, PageTable, Pte};

/// Handle referencing a tracked address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AsHandle(NonZeroU32);

impl AsHandle {
    /// Creates a handle from the backing table index.
    fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    /// Returns the table index backing this handle.
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Returns the raw representation of the handle.
    pub fn to_raw(self) -> u32 {
        self.0.get()
    }
}

/// Errors reported while managing address spaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceError {
    /// Provided handle was not recognised.
    #[error("unknown address space")]
    InvalidHandle,
    /// Underlying map operation failed.
    #[error(transparent)]
    Mapping(#[from] MapError),
}

impl From<AddressSpaceError> for exo_abi::Error {
    fn from(value: AddressSpaceError) -> Self {
        match value {
            AddressSpaceError::InvalidHandle => Self::BadEnv,
            AddressSpaceError::Mapping(err) => err.into(),
        }
    }
}

struct AddressSpace {
    page_table: PageTable,
}

/// Owns the frame pool and every user address space.
pub struct AddressSpaceManager {
    frames: FrameAllocator,
    spaces: Vec<Option<AddressSpace>>,
    active: Option<AsHandle>,
}

impl AddressSpaceManager {
    /// Creates a manager backed by `phys_pages` frames.
    pub fn new(phys_pages: usize) -> Self {
        Self { frames: FrameAllocator::new(phys_pages), spaces: Vec::new(), active: None }
    }

    /// Creates an empty address space. Costs one frame for the page directory.
    pub fn create(&mut self) -> Result<AsHandle, AddressSpaceError> {
        let space = AddressSpace { page_table: PageTable::new(&mut self.frames)? };
        let index = match self.spaces.iter().position(Option::is_none) {
            Some(index) => {
                self.spaces[index] = Some(space);
                index
            }
            None => {
                self.spaces.push(Some(space));
                self.spaces.len() - 1
            }
        };
        Ok(AsHandle::from_index(index))
    }

    /// Releases every user mapping of `handle` and then the space itself.
    pub fn destroy(&mut self, handle: AsHandle) -> Result<(), AddressSpaceError> {
        let space = self
            .spaces
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(AddressSpaceError::InvalidHandle)?;
        if self.active == Some(handle) {
            self.active = None;
        }
        space.page_table.release(&mut self.frames);
        Ok(())
    }

    /// Switches the MMU to `handle`, or to the kernel-only tables for `None`.
    pub fn activate(&mut self, handle: Option<AsHandle>) {
        self.active = handle;
    }

    /// Address space the MMU currently translates through.
    pub fn active(&self) -> Option<AsHandle> {
        self.active
    }

    /// Allocates a zero-filled, unreferenced frame.
    pub fn allocate_page(&mut self) -> Result<PageHandle, MapError> {
        self.frames.alloc()
    }

    /// Returns a frame that never got mapped.
    pub fn free_page(&mut self, page: PageHandle) {
        self.frames.free(page);
    }

    /// Maps `page` at `va` with `perm`, replacing any mapping already there.
    pub fn map(
        &mut self,
        handle: AsHandle,
        va: u32,
        page: PageHandle,
        perm: PteFlags,
    ) -> Result<(), AddressSpaceError> {
        if !is_page_aligned(va) {
            return Err(MapError::Unaligned(va).into());
        }
        if va >= UTOP {
            return Err(MapError::OutOfRange(va).into());
        }
        let space = Self::slot_mut(&mut self.spaces, handle)?;
        space.page_table.insert(&mut self.frames, va, page, perm)?;
        log::trace!(target: "mm", "map as={} va={va:#010x} pa={:#010x} perm={perm:?}", handle.to_raw(), page.pa());
        Ok(())
    }

    /// Removes the mapping at `va`. Unmapping an unmapped address succeeds.
    pub fn unmap(&mut self, handle: AsHandle, va: u32) -> Result<(), AddressSpaceError> {
        let space = Self::slot_mut(&mut self.spaces, handle)?;
        space.page_table.remove(&mut self.frames, va);
        Ok(())
    }

    /// Frame and permissions mapped at `va`.
    pub fn lookup(&self, handle: AsHandle, va: u32) -> Option<(PageHandle, PteFlags)> {
        self.pte(handle, va).map(|pte| (pte.page, pte.flags))
    }

    /// Raw leaf entry at `va`.
    pub fn pte(&self, handle: AsHandle, va: u32) -> Option<Pte> {
        self.slot(handle).ok()?.page_table.lookup(va)
    }

    /// Frame of page table `index`, if allocated.
    pub fn page_table_frame(&self, handle: AsHandle, index: u32) -> Option<PageHandle> {
        self.slot(handle).ok()?.page_table.table(index)
    }

    /// Number of user pages mapped in `handle`.
    pub fn mapped_pages(&self, handle: AsHandle) -> usize {
        self.slot(handle).map_or(0, |space| space.page_table.len())
    }

    /// Iterates the user mappings of `handle`.
    pub fn mappings(&self, handle: AsHandle) -> impl Iterator<Item = (u32, Pte)> + '_ {
        self.slot(handle).ok().into_iter().flat_map(|space| space.page_table.iter())
    }

    /// Current reference count of `page`.
    pub fn refcount(&self, page: PageHandle) -> u32 {
        self.frames.refcount(page)
    }

    /// Frames still available.
    pub fn free_pages(&self) -> usize {
        self.frames.free_count()
    }

    /// Contents of `page`.
    pub fn page_bytes(&self, page: PageHandle) -> &[u8] {
        self.frames.bytes(page)
    }

    /// Mutable contents of `page`.
    pub fn page_bytes_mut(&mut self, page: PageHandle) -> &mut [u8] {
        self.frames.bytes_mut(page)
    }

    /// Checks that `[va, va + len)` lies below `UTOP` and every page in it is
    /// mapped with `perm | PRESENT | USER`. On failure returns the first bad address.
    pub fn user_mem_check(&self, handle: AsHandle, va: u32, len: u32, perm: PteFlags) -> Result<(), u32> {
        let end = va.checked_add(len).ok_or(va)?;
        let need = perm | PteFlags::PRESENT | PteFlags::USER;
        let mut page = round_down(va);
        while page < round_up(end) {
            let bad = page.max(va);
            if page >= UTOP {
                return Err(bad);
            }
            match self.lookup(handle, page) {
                Some((_, flags)) if flags.contains(need) => {}
                _ => return Err(bad),
            }
            page += PGSIZE;
        }
        Ok(())
    }

    /// Copies `data` into user memory of `handle` at `va` regardless of
    /// permissions. Callers check permissions first.
    pub fn copy_out(&mut self, handle: AsHandle, va: u32, data: &[u8]) -> Result<(), u32> {
        let mut done = 0usize;
        while done < data.len() {
            let cur = va.wrapping_add(done as u32);
            let (page, _) = self.lookup(handle, cur).ok_or(cur)?;
            let offset = (cur % PGSIZE) as usize;
            let n = (PGSIZE as usize - offset).min(data.len() - done);
            self.frames.bytes_mut(page)[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Copies user memory of `handle` at `va` into `buf`.
    pub fn copy_in(&self, handle: AsHandle, va: u32, buf: &mut [u8]) -> Result<(), u32> {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va.wrapping_add(done as u32);
            let (page, _) = self.lookup(handle, cur).ok_or(cur)?;
            let offset = (cur % PGSIZE) as usize;
            let n = (PGSIZE as usize - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&self.frames.bytes(page)[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// Makes the next frame allocation fail.
    #[cfg(feature = "failpoints")]
    pub fn fail_next_alloc(&mut self) {
        self.frames.fail_next_alloc();
    }

    fn slot(&self, handle: AsHandle) -> Result<&AddressSpace, AddressSpaceError> {
        self.spaces
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(AddressSpaceError::InvalidHandle)
    }

    fn slot_mut(
        spaces: &mut [Option<AddressSpace>],
        handle: AsHandle,
    ) -> Result<&mut AddressSpace, AddressSpaceError> {
        spaces
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(AddressSpaceError::InvalidHandle)
    }
}
