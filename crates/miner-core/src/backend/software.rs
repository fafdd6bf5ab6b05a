//! Portable software backend.

use super::{passes_early_reject, BackendError, HashBackend, Midstate};
use crate::sha256::{compress, state_to_bytes, IV};

/// Rounds-based SHA-256 backend.
///
/// Ground truth for the hardware path, the fallback when the accelerator is
/// unavailable, and the re-verifier for every hardware candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareBackend;

impl SoftwareBackend {
    pub fn new() -> Self {
        SoftwareBackend
    }

    /// Midstate of the header's first 64 bytes.
    pub fn midstate(&self, first_block: &[u8; 64]) -> Midstate {
        let mut state = IV;
        compress(&mut state, first_block);
        Midstate(state)
    }

    /// Final SHA-256 state of the double hash, before serialization.
    #[inline]
    fn double_hash_state(midstate: &Midstate, tail: &[u8; 16], nonce: u32) -> [u32; 8] {
        // Second header block: 12 tail bytes, nonce, padding, 640-bit length.
        let mut block = [0u8; 64];
        block[..12].copy_from_slice(&tail[..12]);
        block[12..16].copy_from_slice(&nonce.to_le_bytes());
        block[16] = 0x80;
        block[62] = 0x02;
        block[63] = 0x80;

        let mut state = midstate.0;
        compress(&mut state, &block);

        // Hash of the 32-byte first digest, 256-bit length.
        let mut second = [0u8; 64];
        second[..32].copy_from_slice(&state_to_bytes(&state));
        second[32] = 0x80;
        second[62] = 0x01;

        let mut out = IV;
        compress(&mut out, &second);
        out
    }

    /// Double hash with the 16-bit early reject.
    #[inline]
    pub fn finish(&self, midstate: &Midstate, tail: &[u8; 16], nonce: u32) -> Option<[u8; 32]> {
        let state = Self::double_hash_state(midstate, tail, nonce);
        // Digest bytes 30 and 31 are the low half of the last state word.
        if state[7] & 0xFFFF != 0 {
            return None;
        }
        Some(state_to_bytes(&state))
    }

    /// Full double-hash digest with no early reject.
    pub fn digest(&self, midstate: &Midstate, tail: &[u8; 16], nonce: u32) -> [u8; 32] {
        state_to_bytes(&Self::double_hash_state(midstate, tail, nonce))
    }
}

impl HashBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn compute_midstate(&mut self, first_block: &[u8; 64]) -> Result<Midstate, BackendError> {
        Ok(self.midstate(first_block))
    }

    fn finish_hash(
        &mut self,
        midstate: &Midstate,
        tail: &[u8; 16],
        nonce: u32,
    ) -> Result<Option<[u8; 32]>, BackendError> {
        let result = self.finish(midstate, tail, nonce);
        debug_assert!(result.map_or(true, |digest| passes_early_reject(&digest)));
        Ok(result)
    }
}
