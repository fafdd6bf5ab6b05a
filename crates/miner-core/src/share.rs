//! Share classification against pool and block targets.

use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::difficulty::{hash_difficulty, meets_target, Target};
use crate::template::BlockTemplate;

/// Most significant 32 bits of the hash are zero.
pub const FLAG_32BIT: u32 = 0x02;
/// Hash meets the block target.
pub const FLAG_BLOCK: u32 = 0x04;

/// Verdict on one candidate hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Share difficulty, `MAX_TARGET / hash`.
    pub difficulty: f64,
    pub meets_pool: bool,
    pub flags: u32,
}

impl Classification {
    pub fn is_block(&self) -> bool {
        self.flags & FLAG_BLOCK != 0
    }

    pub fn is_32bit(&self) -> bool {
        self.flags & FLAG_32BIT != 0
    }

    /// Whether the hash should be handed to the pool.
    pub fn is_share(&self) -> bool {
        self.meets_pool || self.is_block()
    }
}

/// Classify `hash` against both targets.
///
/// The pool and block checks are independent; a block solution is flagged
/// even if the pool target were somehow tighter.
pub fn classify(hash: &[u8; 32], pool_target: &Target, block_target: &Target) -> Classification {
    let mut flags = 0;
    if hash[28..32] == [0, 0, 0, 0] {
        flags |= FLAG_32BIT;
    }
    if meets_target(hash, block_target) {
        flags |= FLAG_BLOCK;
    }

    Classification {
        difficulty: hash_difficulty(hash),
        meets_pool: meets_target(hash, pool_target),
        flags,
    }
}

/// A share handed to the protocol layer. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: String,
    /// Fixed-width big-endian hex.
    pub extranonce2: String,
    pub timestamp: u32,
    pub nonce: u32,
    pub flags: u32,
    pub difficulty: f64,
}

impl Submission {
    pub fn new(template: &BlockTemplate, nonce: u32, verdict: &Classification) -> Self {
        Submission {
            job_id: template.job_id.clone(),
            extranonce2: template.extranonce2.to_hex(),
            timestamp: template.header.timestamp,
            nonce,
            flags: verdict.flags,
            difficulty: verdict.difficulty,
        }
    }
}
