// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel console backing `cputs` and `cgetc`
//! OWNERS: @kernel-team
//! PUBLIC API: Console
//! DEPENDS_ON: spin::Mutex
//! INVARIANTS: Output is append-only; input bytes are consumed exactly once

extern crate alloc;

use alloc::{collections::VecDeque, string::String, sync::Arc, vec::Vec};

use spin::Mutex;

#[derive(Default)]
struct Buffers {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

/// Shared handle onto the console device. Clones see the same buffers.
#[derive(Clone, Default)]
pub struct Console {
    inner: Arc<Mutex<Buffers>>,
}

impl Console {
    /// Appends bytes written by an environment.
    pub fn write(&self, bytes: &[u8]) {
        self.inner.lock().output.extend_from_slice(bytes);
    }

    /// Queues bytes typed at the console.
    pub fn push_input(&self, bytes: &[u8]) {
        self.inner.lock().input.extend(bytes.iter().copied());
    }

    /// Next pending input byte.
    pub fn getc(&self) -> Option<u8> {
        self.inner.lock().input.pop_front()
    }

    /// Everything written so far, lossily decoded.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().output).into_owned()
    }

    /// Drains the output buffer.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut self.inner.lock().output)
    }
}

impl core::fmt::Debug for Console {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Console")
            .field("output_len", &inner.output.len())
            .field("pending_input", &inner.input.len())
            .finish()
    }
}
