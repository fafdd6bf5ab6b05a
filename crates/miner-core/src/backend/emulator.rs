//! In-memory model of the SHA accelerator's register file.
//!
//! Used to exercise [`HardwareBackend`](super::HardwareBackend) off-target
//! and to inject the faults the mining loop has to survive.

use super::hardware::{
    ShaRegisters, MODE_SHA256, SHA_BUSY, SHA_CONTINUE, SHA_H_BASE, SHA_MODE, SHA_START,
    SHA_TEXT_BASE,
};
use crate::sha256::{compress, IV};

/// Misbehaviour to inject into the emulated peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulatorFault {
    #[default]
    None,
    /// BUSY never clears once a block is started.
    Wedged,
    /// H registers read back as zero.
    ZeroDigest,
}

#[derive(Debug, Clone)]
pub struct EmulatedAccelerator {
    mode: u32,
    text: [u32; 16],
    h: [u32; 8],
    busy: u32,
    latency: u32,
    fault: EmulatorFault,
    blocks: u64,
}

impl Default for EmulatedAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedAccelerator {
    pub fn new() -> Self {
        EmulatedAccelerator {
            mode: 0,
            text: [0; 16],
            h: [0; 8],
            busy: 0,
            latency: 0,
            fault: EmulatorFault::None,
            blocks: 0,
        }
    }

    /// BUSY reads non-zero `latency` times after each block starts.
    pub fn with_latency(latency: u32) -> Self {
        EmulatedAccelerator {
            latency,
            ..Self::new()
        }
    }

    pub fn with_fault(fault: EmulatorFault) -> Self {
        EmulatedAccelerator {
            fault,
            ..Self::new()
        }
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Blocks processed since construction.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    fn process(&mut self, from_iv: bool) {
        if self.fault == EmulatorFault::Wedged {
            self.busy = u32::MAX;
        } else {
            self.busy = self.latency;
        }
        if self.mode != MODE_SHA256 {
            return;
        }

        let mut block = [0u8; 64];
        for (chunk, word) in block.chunks_exact_mut(4).zip(self.text.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let mut state = if from_iv {
            IV
        } else {
            self.h.map(u32::swap_bytes)
        };
        compress(&mut state, &block);
        self.h = state.map(u32::swap_bytes);
        self.blocks += 1;
    }
}

impl ShaRegisters for EmulatedAccelerator {
    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            SHA_MODE => self.mode,
            SHA_BUSY => {
                if self.fault == EmulatorFault::Wedged && self.busy > 0 {
                    return 1;
                }
                if self.busy > 0 {
                    self.busy -= 1;
                    1
                } else {
                    0
                }
            }
            o if (SHA_H_BASE..SHA_H_BASE + 32).contains(&o) => {
                if self.fault == EmulatorFault::ZeroDigest {
                    0
                } else {
                    self.h[(o - SHA_H_BASE) / 4]
                }
            }
            o if (SHA_TEXT_BASE..SHA_TEXT_BASE + 64).contains(&o) => {
                self.text[(o - SHA_TEXT_BASE) / 4]
            }
            _ => 0,
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            SHA_MODE => self.mode = value,
            SHA_START => self.process(true),
            SHA_CONTINUE => self.process(false),
            o if (SHA_H_BASE..SHA_H_BASE + 32).contains(&o) => {
                self.h[(o - SHA_H_BASE) / 4] = value;
            }
            o if (SHA_TEXT_BASE..SHA_TEXT_BASE + 64).contains(&o) => {
                self.text[(o - SHA_TEXT_BASE) / 4] = value;
            }
            _ => {}
        }
    }
}
