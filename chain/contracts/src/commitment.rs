//! Bid commitments: commit-reveal hashing
//!
//! A commitment is `keccak256(uint256_be(amount) ‖ nonce)`, the packed
//! `(uint256, bytes32)` encoding bidders compute client-side. The same
//! function verifies the reveal, so commit and reveal can never disagree on
//! encoding.

use procurement_types::amount::Amount;
use procurement_types::hash::{Hash32, Nonce};
use sha3::{Digest, Keccak256};

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    Hash32::new(output)
}

/// Commitment binding a bidder to `amount` under `nonce`.
pub fn compute_commitment(amount: Amount, nonce: &Nonce) -> Hash32 {
    let mut packed = [0u8; 64];
    packed[..32].copy_from_slice(&amount.to_be_word());
    packed[32..].copy_from_slice(nonce.as_bytes());
    keccak256(&packed)
}

/// Whether `(amount, nonce)` opens `commitment`.
pub fn verify_commitment(commitment: &Hash32, amount: Amount, nonce: &Nonce) -> bool {
    compute_commitment(amount, nonce) == *commitment
}

/// Fingerprint of a human-readable tender description.
pub fn description_hash(description: &str) -> Hash32 {
    keccak256(description.as_bytes())
}
