//! Pool job as delivered by the protocol layer.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Most merkle branches a job may carry.
pub const MAX_MERKLE_BRANCHES: usize = 16;

/// A mining job: everything needed to build a header, still in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// Previous block hash, 64 hex chars as the pool sends it.
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    #[serde(default)]
    pub merkle_branches: Vec<String>,
    /// Block version, 8 hex chars, big-endian.
    pub version: String,
    /// Compact target, 8 hex chars, big-endian.
    pub nbits: String,
    /// Timestamp, 8 hex chars, big-endian.
    pub ntime: String,
    #[serde(default)]
    pub clean_jobs: bool,
    /// Per-job extranonce1 override; the session value is used when absent.
    #[serde(default)]
    pub extranonce1: Option<String>,
}
