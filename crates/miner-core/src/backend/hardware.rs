//! Register-level driver for a memory-mapped SHA-256 accelerator.
//!
//! Register map (byte offsets from the peripheral base):
//!
//! | offset | register   | access                                            |
//! |--------|------------|---------------------------------------------------|
//! | 0x00   | MODE       | write `MODE_SHA256` to select SHA-256             |
//! | 0x10   | START      | write 1: hash TEXT from the initial vector        |
//! | 0x14   | CONTINUE   | write 1: hash TEXT from the state in H            |
//! | 0x18   | BUSY       | non-zero while a block is in flight               |
//! | 0x40   | H[0..8]    | state / digest words                              |
//! | 0x80   | TEXT[0..16]| message block words                               |
//!
//! The peripheral reads each TEXT word as the little-endian load of four
//! message bytes, and keeps each H word byte-swapped relative to the logical
//! SHA-256 state word. Copying H straight into TEXT therefore feeds the
//! digest bytes back in as a message, which is how the second hash is
//! chained without a round trip through memory.

use log::warn;

use super::{BackendError, HashBackend, Midstate};

const LOG_TARGET: &str = "miner::hw";

pub const SHA_MODE: usize = 0x00;
pub const SHA_START: usize = 0x10;
pub const SHA_CONTINUE: usize = 0x14;
pub const SHA_BUSY: usize = 0x18;
pub const SHA_H_BASE: usize = 0x40;
pub const SHA_TEXT_BASE: usize = 0x80;

/// MODE register value selecting SHA-256.
pub const MODE_SHA256: u32 = 2;

/// Busy polls before a block is declared lost.
pub const DEFAULT_POLL_LIMIT: u32 = 10_000;

/// 0x80 padding byte as the first byte of a TEXT word.
const PAD_WORD: u32 = 0x0000_0080;
/// 640-bit message length, as the last TEXT word of block 2.
const LEN_640_WORD: u32 = 0x8002_0000;
/// 256-bit message length, as the last TEXT word of the second hash.
const LEN_256_WORD: u32 = 0x0001_0000;

/// A 32-bit register bus.
pub trait ShaRegisters {
    fn read(&mut self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

/// Volatile access to a memory-mapped peripheral.
#[derive(Debug)]
pub struct Mmio {
    base: *mut u32,
}

// The peripheral is only reached through `&mut self`; exclusive use across
// cores is the arbiter's job.
unsafe impl Send for Mmio {}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a SHA peripheral with the register map
    /// above, valid for the lifetime of the returned value, and not driven
    /// through any other handle at the same time.
    pub const unsafe fn new(base: usize) -> Self {
        Mmio {
            base: base as *mut u32,
        }
    }
}

impl ShaRegisters for Mmio {
    #[inline]
    fn read(&mut self, offset: usize) -> u32 {
        // SAFETY: offsets come from the register map, inside the block
        // guaranteed by `Mmio::new`.
        unsafe { core::ptr::read_volatile(self.base.add(offset / 4)) }
    }

    #[inline]
    fn write(&mut self, offset: usize, value: u32) {
        // SAFETY: as for `read`.
        unsafe { core::ptr::write_volatile(self.base.add(offset / 4), value) }
    }
}

/// Hash backend driving the accelerator's register protocol.
///
/// Every busy poll is bounded. On expiry the mode register is rewritten to
/// re-synchronize the peripheral and `BackendError::Timeout` is returned;
/// a partially read digest is never reported.
#[derive(Debug)]
pub struct HardwareBackend<R> {
    regs: R,
    poll_limit: u32,
    timeouts: u64,
}

impl<R: ShaRegisters> HardwareBackend<R> {
    pub fn new(regs: R, poll_limit: u32) -> Self {
        let mut backend = HardwareBackend {
            regs,
            poll_limit: poll_limit.max(1),
            timeouts: 0,
        };
        backend.resync();
        backend
    }

    /// Total busy-poll timeouts seen by this backend.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Access the underlying register bus.
    pub fn registers(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Reselect SHA-256 mode.
    pub fn resync(&mut self) {
        self.regs.write(SHA_MODE, MODE_SHA256);
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        for _ in 0..self.poll_limit {
            if self.regs.read(SHA_BUSY) == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }

        self.timeouts += 1;
        warn!(target: LOG_TARGET, "SHA busy poll exceeded {} reads, resyncing", self.poll_limit);
        self.resync();
        Err(BackendError::Timeout)
    }

    #[inline]
    fn write_text(&mut self, index: usize, value: u32) {
        self.regs.write(SHA_TEXT_BASE + index * 4, value);
    }

    #[inline]
    fn read_h(&mut self, index: usize) -> u32 {
        self.regs.read(SHA_H_BASE + index * 4)
    }
}

impl<R: ShaRegisters> HashBackend for HardwareBackend<R> {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn is_hardware(&self) -> bool {
        true
    }

    fn compute_midstate(&mut self, first_block: &[u8; 64]) -> Result<Midstate, BackendError> {
        self.wait_idle()?;
        self.resync();
        for (i, chunk) in first_block.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_text(i, word);
        }
        self.regs.write(SHA_START, 1);
        self.wait_idle()?;

        let mut state = [0u32; 8];
        for (i, word) in state.iter_mut().enumerate() {
            *word = self.read_h(i).swap_bytes();
        }
        Ok(Midstate(state))
    }

    fn finish_hash(
        &mut self,
        midstate: &Midstate,
        tail: &[u8; 16],
        nonce: u32,
    ) -> Result<Option<[u8; 32]>, BackendError> {
        self.wait_idle()?;

        // Restore the first-block state.
        for (i, word) in midstate.0.iter().enumerate() {
            self.regs.write(SHA_H_BASE + i * 4, word.swap_bytes());
        }

        // Block 2: tail, nonce, padding, length.
        for i in 0..3 {
            let at = i * 4;
            let word = u32::from_le_bytes([tail[at], tail[at + 1], tail[at + 2], tail[at + 3]]);
            self.write_text(i, word);
        }
        self.write_text(3, nonce);
        self.write_text(4, PAD_WORD);
        for i in 5..15 {
            self.write_text(i, 0);
        }
        self.write_text(15, LEN_640_WORD);
        self.regs.write(SHA_CONTINUE, 1);
        self.wait_idle()?;

        // Second hash: feed the first digest back in as the message.
        for i in 0..8 {
            let word = self.read_h(i);
            self.write_text(i, word);
        }
        self.write_text(8, PAD_WORD);
        for i in 9..15 {
            self.write_text(i, 0);
        }
        self.write_text(15, LEN_256_WORD);
        self.regs.write(SHA_START, 1);
        self.wait_idle()?;

        // Early reject on the most significant 16 bits (digest bytes 30, 31).
        let last = self.read_h(7);
        if last >> 16 != 0 {
            return Ok(None);
        }

        let mut digest = [0u8; 32];
        for i in 0..7 {
            let word = self.read_h(i);
            digest[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        digest[28..32].copy_from_slice(&last.to_le_bytes());
        Ok(Some(digest))
    }
}
