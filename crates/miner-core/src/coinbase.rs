//! Coinbase transaction assembly from pool-supplied fragments.
//!
//! The pool hands out the coinbase transaction split around the extra-nonce
//! area: `coinbase1 ‖ extranonce1 ‖ extranonce2 ‖ coinbase2`. The miner owns
//! extranonce2 and varies it per job to get a fresh merkle root.

use alloc::string::String;
use alloc::vec::Vec;

use crate::hash::double_sha256;
use crate::template::TemplateError;

/// Upper bound on the assembled coinbase transaction.
pub const MAX_COINBASE_SIZE: usize = 512;

/// Widest extranonce2 the miner will produce.
pub const MAX_EXTRANONCE2_SIZE: usize = 8;

/// Miner-chosen extra nonce, serialized fixed-width big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraNonce2 {
    value: u64,
    size: usize,
}

impl ExtraNonce2 {
    /// Create an extranonce2 of `size` bytes (clamped to 1..=8).
    ///
    /// Bits of `value` that do not fit in `size` bytes are dropped.
    pub fn new(value: u64, size: usize) -> Self {
        let size = size.clamp(1, MAX_EXTRANONCE2_SIZE);
        let value = if size == MAX_EXTRANONCE2_SIZE {
            value
        } else {
            value & ((1u64 << (size * 8)) - 1)
        };
        ExtraNonce2 { value, size }
    }

    /// Parse the hex form produced by [`ExtraNonce2::to_hex`].
    pub fn from_hex(hex_str: &str) -> Result<Self, TemplateError> {
        let bytes = hex::decode(hex_str).map_err(|_| TemplateError::InvalidHex("extranonce2"))?;
        if bytes.is_empty() || bytes.len() > MAX_EXTRANONCE2_SIZE {
            return Err(TemplateError::BadLength {
                field: "extranonce2",
                expected: MAX_EXTRANONCE2_SIZE,
                actual: bytes.len(),
            });
        }
        let value = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        Ok(ExtraNonce2 {
            value,
            size: bytes.len(),
        })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Big-endian bytes, exactly `size` long.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_be_bytes()[MAX_EXTRANONCE2_SIZE - self.size..].to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Concatenate the coinbase fragments.
pub fn build_coinbase(
    coinbase1: &[u8],
    extranonce1: &[u8],
    extranonce2: &ExtraNonce2,
    coinbase2: &[u8],
) -> Result<Vec<u8>, TemplateError> {
    let size = coinbase1.len() + extranonce1.len() + extranonce2.size() + coinbase2.len();
    if size > MAX_COINBASE_SIZE {
        return Err(TemplateError::CoinbaseTooLarge(size));
    }

    let mut tx = Vec::with_capacity(size);
    tx.extend_from_slice(coinbase1);
    tx.extend_from_slice(extranonce1);
    tx.extend_from_slice(&extranonce2.to_bytes());
    tx.extend_from_slice(coinbase2);
    Ok(tx)
}

/// Double SHA-256 of the coinbase, in internal byte order (not reversed).
pub fn coinbase_hash(coinbase: &[u8]) -> [u8; 32] {
    double_sha256(coinbase)
}
