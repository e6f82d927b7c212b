// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tick-driven time source advanced by the timer interrupt.

/// Monotonic tick counter.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    ticks: u64,
    tick_ms: u32,
}

impl Clock {
    /// Starts a clock at zero with the given tick period.
    pub const fn new(tick_ms: u32) -> Self {
        Self { ticks: 0, tick_ms }
    }

    /// Advances by one tick.
    pub fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    /// Ticks since boot.
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Milliseconds since boot, truncated to the 32-bit register width.
    pub fn msec(&self) -> u32 {
        self.ticks.wrapping_mul(u64::from(self.tick_ms)) as u32
    }
}
