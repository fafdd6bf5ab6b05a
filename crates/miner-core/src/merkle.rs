//! Merkle root folding for pool jobs.

use crate::hash::double_sha256;

/// Fold the coinbase hash up the pool's merkle branch to the root.
///
/// Branches are applied in the order the pool sent them, each as the right
/// sibling: `fold = SHA256d(fold ‖ branch)`. Neither branches nor
/// intermediate folds are byte-reversed; the pool sends branches in the
/// same internal order the hashes come out of SHA-256.
pub fn fold_merkle_branches(coinbase_hash: &[u8; 32], branches: &[[u8; 32]]) -> [u8; 32] {
    let mut pair = [0u8; 64];
    pair[..32].copy_from_slice(coinbase_hash);

    for branch in branches {
        pair[32..].copy_from_slice(branch);
        let folded = double_sha256(&pair);
        pair[..32].copy_from_slice(&folded);
    }

    let mut root = [0u8; 32];
    root.copy_from_slice(&pair[..32]);
    root
}
