// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Register layouts that cross the kernel/user boundary.

/// General-purpose registers in `pusha` order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushRegs {
    /// `edi`.
    pub edi: u32,
    /// `esi`.
    pub esi: u32,
    /// `ebp`.
    pub ebp: u32,
    /// Ignored `esp` slot of `pusha`.
    pub oesp: u32,
    /// `ebx`.
    pub ebx: u32,
    /// `edx`.
    pub edx: u32,
    /// `ecx`.
    pub ecx: u32,
    /// `eax`.
    pub eax: u32,
}

impl PushRegs {
    /// Number of 32-bit words.
    pub const WORDS: usize = 8;

    fn to_words(self) -> [u32; Self::WORDS] {
        [self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            edi: w[0],
            esi: w[1],
            ebp: w[2],
            oesp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
        }
    }
}

/// Fault record the kernel pushes onto the user exception stack before an upcall.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address.
    pub fault_va: u32,
    /// Page-fault error code (`FEC_*`).
    pub err: u32,
    /// Trap-time general-purpose registers.
    pub regs: PushRegs,
    /// Trap-time instruction pointer.
    pub eip: u32,
    /// Trap-time flags.
    pub eflags: u32,
    /// Trap-time stack pointer.
    pub esp: u32,
}

impl UTrapframe {
    /// Size of the record in user memory.
    pub const SIZE: u32 = 4 * (5 + PushRegs::WORDS as u32);

    /// Encodes the record as little-endian words in field order.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE as usize] {
        let mut words = [0u32; 13];
        words[0] = self.fault_va;
        words[1] = self.err;
        words[2..10].copy_from_slice(&self.regs.to_words());
        words[10] = self.eip;
        words[11] = self.eflags;
        words[12] = self.esp;
        let mut out = [0u8; Self::SIZE as usize];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes a record previously produced by [`UTrapframe::to_le_bytes`].
    pub fn from_le_bytes(bytes: &[u8; Self::SIZE as usize]) -> Self {
        let mut words = [0u32; 13];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            fault_va: words[0],
            err: words[1],
            regs: PushRegs::from_words(&words[2..10]),
            eip: words[10],
            eflags: words[11],
            esp: words[12],
        }
    }

    /// Trap-time context captured in this record.
    pub fn context(&self) -> UserContext {
        UserContext { regs: self.regs, eip: self.eip, eflags: self.eflags, esp: self.esp }
    }
}

/// User-modifiable part of the register file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserContext {
    /// General-purpose registers.
    pub regs: PushRegs,
    /// Instruction pointer.
    pub eip: u32,
    /// Flags.
    pub eflags: u32,
    /// Stack pointer.
    pub esp: u32,
}
