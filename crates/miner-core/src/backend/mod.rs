//! Midstate-cached double SHA-256 backends.
//!
//! Every backend turns (midstate, 16-byte header tail, nonce) into the
//! double-SHA-256 of the full 80-byte header. Results whose most significant
//! 16 bits are non-zero are rejected before the digest is materialized, which
//! throws away all but roughly 1 in 65536 candidates.
//!
//! Backends are bit-exact with each other. The software backend is the ground
//! truth: anything the hardware path reports must be re-verified by it before
//! it is trusted.

mod emulator;
mod hardware;
mod software;

pub use emulator::{EmulatedAccelerator, EmulatorFault};
pub use hardware::{
    HardwareBackend, Mmio, ShaRegisters, DEFAULT_POLL_LIMIT, MODE_SHA256, SHA_BUSY, SHA_CONTINUE,
    SHA_H_BASE, SHA_MODE, SHA_START, SHA_TEXT_BASE,
};
pub use software::SoftwareBackend;

use crate::hash::sha256;
use crate::sha256::state_to_bytes;

/// SHA-256 state after absorbing the first 64 header bytes.
///
/// Held as logical state words; each backend converts to its own register
/// or memory layout internally, so a midstate from one backend can be handed
/// to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midstate(pub [u32; 8]);

/// Errors raised by a hash backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// The accelerator stayed busy past the poll limit.
    Timeout,
    /// The known-answer check produced a wrong digest.
    SelfTest,
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BackendError::Timeout => write!(f, "Hash accelerator busy-poll timed out"),
            BackendError::SelfTest => write!(f, "Hash backend failed its self-test"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BackendError {}

/// A double SHA-256 engine for 80-byte block headers.
pub trait HashBackend {
    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Whether this backend drives a hardware accelerator.
    fn is_hardware(&self) -> bool {
        false
    }

    /// Compute the SHA-256 state after the header's first 64 bytes.
    fn compute_midstate(&mut self, first_block: &[u8; 64]) -> Result<Midstate, BackendError>;

    /// Finish the double hash for one nonce.
    ///
    /// `tail` is header bytes 64..80; its last four bytes are replaced by
    /// `nonce` (little-endian). Returns `Ok(None)` when the result fails the
    /// 16-bit early reject, otherwise the full digest with the most
    /// significant byte at index 31.
    fn finish_hash(
        &mut self,
        midstate: &Midstate,
        tail: &[u8; 16],
        nonce: u32,
    ) -> Result<Option<[u8; 32]>, BackendError>;
}

impl<B: HashBackend + ?Sized> HashBackend for alloc::boxed::Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_hardware(&self) -> bool {
        (**self).is_hardware()
    }

    fn compute_midstate(&mut self, first_block: &[u8; 64]) -> Result<Midstate, BackendError> {
        (**self).compute_midstate(first_block)
    }

    fn finish_hash(
        &mut self,
        midstate: &Midstate,
        tail: &[u8; 16],
        nonce: u32,
    ) -> Result<Option<[u8; 32]>, BackendError> {
        (**self).finish_hash(midstate, tail, nonce)
    }
}

/// Known-answer check: one compression of the padded empty message must
/// equal SHA-256 of "".
pub fn self_test<B: HashBackend + ?Sized>(backend: &mut B) -> Result<(), BackendError> {
    let mut block = [0u8; 64];
    block[0] = 0x80;

    let midstate = backend.compute_midstate(&block)?;
    if state_to_bytes(&midstate.0) == sha256(b"") {
        Ok(())
    } else {
        Err(BackendError::SelfTest)
    }
}

/// True when the digest's most significant 16 bits are zero.
#[inline]
pub fn passes_early_reject(digest: &[u8; 32]) -> bool {
    digest[31] == 0 && digest[30] == 0
}
