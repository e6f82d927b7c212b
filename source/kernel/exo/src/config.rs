// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time kernel configuration.

/// Tunables handed to [`crate::Kernel::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Physical pages available to the frame allocator.
    pub phys_pages: usize,
    /// Milliseconds per timer tick.
    pub tick_ms: u32,
}

impl KernelConfig {
    /// Default physical memory: 4 MiB.
    pub const DEFAULT_PHYS_PAGES: usize = 1024;
    /// Default timer period.
    pub const DEFAULT_TICK_MS: u32 = 10;

    /// Returns a copy with `phys_pages` replaced.
    pub const fn with_phys_pages(mut self, phys_pages: usize) -> Self {
        self.phys_pages = phys_pages;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { phys_pages: Self::DEFAULT_PHYS_PAGES, tick_ms: Self::DEFAULT_TICK_MS }
    }
}
