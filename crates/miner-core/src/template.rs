//! Block template construction from a pool job.

use alloc::string::String;
use alloc::vec::Vec;

use crate::coinbase::{build_coinbase, coinbase_hash, ExtraNonce2};
use crate::difficulty::{bits_to_target, Target};
use crate::header::BlockHeader;
use crate::job::{Job, MAX_MERKLE_BRANCHES};
use crate::merkle::fold_merkle_branches;

/// Errors building a template from a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A field was not valid hex.
    InvalidHex(&'static str),
    /// A field decoded to the wrong number of bytes.
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// More merkle branches than the miner supports.
    TooManyBranches(usize),
    /// Assembled coinbase exceeds the size limit.
    CoinbaseTooLarge(usize),
}

impl core::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TemplateError::InvalidHex(field) => write!(f, "Invalid hex in {}", field),
            TemplateError::BadLength {
                field,
                expected,
                actual,
            } => write!(f, "{} must be {} bytes, got {}", field, expected, actual),
            TemplateError::TooManyBranches(n) => write!(
                f,
                "Job has {} merkle branches (max {})",
                n, MAX_MERKLE_BRANCHES
            ),
            TemplateError::CoinbaseTooLarge(n) => write!(f, "Coinbase is {} bytes", n),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TemplateError {}

/// A header ready for nonce search, plus what a share submission needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub job_id: String,
    /// Header with nonce 0.
    pub header: BlockHeader,
    /// Target expanded from the job's `nbits`.
    pub block_target: Target,
    pub extranonce2: ExtraNonce2,
}

impl BlockTemplate {
    /// Build the header for `job`.
    ///
    /// `extranonce1_hex` is the session extranonce1; a job carrying its own
    /// `extranonce1` overrides it.
    pub fn from_job(
        job: &Job,
        extranonce1_hex: &str,
        extranonce2: ExtraNonce2,
    ) -> Result<Self, TemplateError> {
        if job.merkle_branches.len() > MAX_MERKLE_BRANCHES {
            return Err(TemplateError::TooManyBranches(job.merkle_branches.len()));
        }

        let prev_hash = swap_words(decode_array::<32>(&job.prev_hash, "prev_hash")?);
        let version = decode_u32(&job.version, "version")?;
        let bits = decode_u32(&job.nbits, "nbits")?;
        let timestamp = decode_u32(&job.ntime, "ntime")?;

        let coinbase1 = decode(&job.coinbase1, "coinbase1")?;
        let coinbase2 = decode(&job.coinbase2, "coinbase2")?;
        let extranonce1 = decode(
            job.extranonce1.as_deref().unwrap_or(extranonce1_hex),
            "extranonce1",
        )?;

        let branches = job
            .merkle_branches
            .iter()
            .map(|branch| decode_array::<32>(branch, "merkle_branch"))
            .collect::<Result<Vec<_>, _>>()?;

        let coinbase = build_coinbase(&coinbase1, &extranonce1, &extranonce2, &coinbase2)?;
        let merkle_root = fold_merkle_branches(&coinbase_hash(&coinbase), &branches);

        Ok(BlockTemplate {
            job_id: job.job_id.clone(),
            header: BlockHeader {
                version,
                prev_hash,
                merkle_root,
                timestamp,
                bits,
                nonce: 0,
            },
            block_target: bits_to_target(bits),
            extranonce2,
        })
    }
}

fn decode(hex_str: &str, field: &'static str) -> Result<Vec<u8>, TemplateError> {
    hex::decode(hex_str).map_err(|_| TemplateError::InvalidHex(field))
}

fn decode_array<const N: usize>(hex_str: &str, field: &'static str) -> Result<[u8; N], TemplateError> {
    let bytes = decode(hex_str, field)?;
    if bytes.len() != N {
        return Err(TemplateError::BadLength {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parse an 8-hex-digit big-endian word.
fn decode_u32(hex_str: &str, field: &'static str) -> Result<u32, TemplateError> {
    Ok(u32::from_be_bytes(decode_array::<4>(hex_str, field)?))
}

/// Reverse the bytes inside each 4-byte word.
fn swap_words(mut bytes: [u8; 32]) -> [u8; 32] {
    for word in bytes.chunks_exact_mut(4) {
        word.reverse();
    }
    bytes
}
