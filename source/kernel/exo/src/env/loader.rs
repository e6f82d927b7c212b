// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Places a program image into a fresh environment.
//!
//! Image parsing (ELF headers and friends) happens before this point; the
//! kernel only sees the resulting list of loadable segments.

use alloc::vec;
use alloc::vec::Vec;

use exo_abi::memlayout::{round_down, round_up, PGSIZE, USTACKTOP, UTOP};
use exo_abi::{Error, PteFlags};

use crate::kernel::Kernel;
use crate::mm::AsHandle;

/// One loadable segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    /// Virtual address of the first byte.
    pub va: u32,
    /// File-backed bytes.
    pub data: Vec<u8>,
    /// Size in memory; bytes past `data` are zero.
    pub mem_len: u32,
    /// Map the segment writable.
    pub writable: bool,
}

/// A parsed program ready to load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramImage {
    /// Entry point.
    pub entry: u32,
    /// Loadable segments.
    pub segments: Vec<Segment>,
}

/// Why an image could not be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// A segment reaches `UTOP` or wraps the address space.
    #[error("segment at {va:#010x} reaches beyond user space")]
    OutOfRange {
        /// Segment start.
        va: u32,
    },
    /// A segment carries more file bytes than its memory size.
    #[error("segment at {va:#010x} has more file bytes than memory")]
    FileLargerThanMemory {
        /// Segment start.
        va: u32,
    },
    /// Environment allocation or mapping failed.
    #[error(transparent)]
    Env(#[from] Error),
}

impl Kernel {
    pub(crate) fn load_icode(&mut self, slot: usize, image: &ProgramImage) -> Result<(), LoadError> {
        let space = self.envs.get(slot).address_space().ok_or(Error::BadEnv)?;
        for seg in &image.segments {
            let end = seg.va.checked_add(seg.mem_len).ok_or(LoadError::OutOfRange { va: seg.va })?;
            if end > UTOP {
                return Err(LoadError::OutOfRange { va: seg.va });
            }
            if seg.data.len() > seg.mem_len as usize {
                return Err(LoadError::FileLargerThanMemory { va: seg.va });
            }
            let mut perm = PteFlags::PRESENT | PteFlags::USER;
            if seg.writable {
                perm |= PteFlags::WRITABLE;
            }
            self.region_alloc(space, seg.va, seg.mem_len, perm)?;
            self.spaces.copy_out(space, seg.va, &seg.data).map_err(|_| Error::Fault)?;
            let bss = (seg.mem_len as usize) - seg.data.len();
            if bss > 0 {
                let bss_va = seg.va + seg.data.len() as u32;
                self.spaces.copy_out(space, bss_va, &vec![0; bss]).map_err(|_| Error::Fault)?;
            }
            log::debug!(
                target: "loader",
                "segment {:#010x}..{end:#010x} ({} file bytes, {perm:?})",
                seg.va,
                seg.data.len()
            );
        }

        let stack = PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE;
        self.region_alloc(space, USTACKTOP - PGSIZE, PGSIZE, stack)?;
        self.envs.get_mut(slot).tf.eip = image.entry;
        Ok(())
    }

    /// Backs `[va, va + len)` with fresh pages where nothing is mapped yet.
    fn region_alloc(&mut self, space: AsHandle, va: u32, len: u32, perm: PteFlags) -> Result<(), Error> {
        let mut page = round_down(va);
        let end = round_up(va.saturating_add(len));
        while page < end {
            if self.spaces.lookup(space, page).is_none() {
                let frame = self.spaces.allocate_page()?;
                if let Err(err) = self.spaces.map(space, page, frame, perm) {
                    self.spaces.free_page(frame);
                    return Err(err.into());
                }
            }
            page += PGSIZE;
        }
        Ok(())
    }
}
