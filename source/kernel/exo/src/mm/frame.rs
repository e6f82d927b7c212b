// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical frame allocator with per-frame reference counts.

use alloc::{boxed::Box, vec::Vec};

use exo_abi::memlayout::{PGSHIFT, PGSIZE};

use super::MapError;

/// Backing storage of one frame.
type FrameBytes = [u8; PGSIZE as usize];

/// Reference to a physical frame (its page number).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageHandle(u32);

impl PageHandle {
    /// Physical page number.
    pub const fn ppn(self) -> u32 {
        self.0
    }

    /// Physical address of the first byte.
    pub const fn pa(self) -> u32 {
        self.0 << PGSHIFT
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Default)]
struct Frame {
    refs: u32,
    data: Option<Box<FrameBytes>>,
}

/// Hands out zero-filled frames and reclaims them when the last reference drops.
pub struct FrameAllocator {
    frames: Vec<Frame>,
    free: Vec<PageHandle>,
    #[cfg(feature = "failpoints")]
    fail_next: bool,
}

impl FrameAllocator {
    /// Creates an allocator managing `npages` frames.
    pub fn new(npages: usize) -> Self {
        let mut frames = Vec::with_capacity(npages);
        frames.resize_with(npages, Frame::default);
        // Low frames are handed out first.
        let free = (0..npages as u32).rev().map(PageHandle).collect();
        Self {
            frames,
            free,
            #[cfg(feature = "failpoints")]
            fail_next: false,
        }
    }

    /// Allocates a zero-filled frame with a reference count of zero.
    pub fn alloc(&mut self) -> Result<PageHandle, MapError> {
        #[cfg(feature = "failpoints")]
        if core::mem::take(&mut self.fail_next) {
            return Err(MapError::NoMem);
        }
        let page = self.free.pop().ok_or(MapError::NoMem)?;
        let frame = &mut self.frames[page.index()];
        debug_assert_eq!(frame.refs, 0);
        match frame.data.as_mut() {
            Some(bytes) => bytes.fill(0),
            None => frame.data = Some(Box::new([0; PGSIZE as usize])),
        }
        Ok(page)
    }

    /// Returns an unreferenced frame to the free list.
    pub fn free(&mut self, page: PageHandle) {
        debug_assert_eq!(self.frames[page.index()].refs, 0, "freeing a referenced frame");
        if self.frames[page.index()].refs == 0 {
            self.free.push(page);
        }
    }

    /// Records one more reference to `page`.
    pub fn incref(&mut self, page: PageHandle) {
        self.frames[page.index()].refs += 1;
    }

    /// Drops one reference to `page`, freeing it at zero.
    pub fn decref(&mut self, page: PageHandle) {
        let frame = &mut self.frames[page.index()];
        debug_assert!(frame.refs > 0, "decref of unreferenced frame");
        frame.refs = frame.refs.saturating_sub(1);
        if frame.refs == 0 {
            self.free.push(page);
        }
    }

    /// Current reference count of `page`.
    pub fn refcount(&self, page: PageHandle) -> u32 {
        self.frames[page.index()].refs
    }

    /// Number of frames on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Contents of `page`.
    pub fn bytes(&self, page: PageHandle) -> &[u8] {
        match &self.frames[page.index()].data {
            Some(bytes) => &bytes[..],
            None => &[],
        }
    }

    /// Mutable contents of `page`.
    pub fn bytes_mut(&mut self, page: PageHandle) -> &mut [u8] {
        match &mut self.frames[page.index()].data {
            Some(bytes) => &mut bytes[..],
            None => &mut [],
        }
    }

    /// Makes the next [`FrameAllocator::alloc`] fail with [`MapError::NoMem`].
    #[cfg(feature = "failpoints")]
    pub fn fail_next_alloc(&mut self) {
        self.fail_next = true;
    }
}
