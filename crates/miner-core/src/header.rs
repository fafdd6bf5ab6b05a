//! Block header layout and serialization.

use crate::difficulty::{bits_to_target, Target};
use crate::hash::double_sha256;

/// Serialized header size.
pub const HEADER_SIZE: usize = 80;

/// A block header (80 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version, including version-rolling bits.
    pub version: u32,
    /// Previous block hash, each 4-byte word reversed relative to the
    /// pool's hex.
    pub prev_hash: [u8; 32],
    /// Merkle root (internal byte order).
    pub merkle_root: [u8; 32],
    /// Block timestamp (Unix time).
    pub timestamp: u32,
    /// Difficulty target in compact "bits" format.
    pub bits: u32,
    /// Nonce for proof of work.
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize the block header to 80 bytes.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];

        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());
        header[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        header
    }

    /// First SHA-256 block: bytes 0..64, everything the nonce does not touch.
    pub fn first_block(&self) -> [u8; 64] {
        let mut block = [0u8; 64];
        block.copy_from_slice(&self.serialize()[..64]);
        block
    }

    /// Bytes 64..80: merkle root tail, timestamp, bits and nonce.
    pub fn tail(&self) -> [u8; 16] {
        let mut tail = [0u8; 16];
        tail.copy_from_slice(&self.serialize()[64..]);
        tail
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    /// Compute the block hash (double SHA256).
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }

    /// Block target from `bits`.
    pub fn target(&self) -> Target {
        bits_to_target(self.bits)
    }
}
