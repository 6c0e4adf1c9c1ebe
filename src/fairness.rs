//! Provably fair crash-point derivation (commit-reveal).
//!
//! The crash point for a round is a pure function of `(seed, round_number)`.
//! The full SHA-256 digest of that input is published as the commit hash when
//! the round starts, before the crash point is revealed; after the crash a
//! player can recompute the digest and verify the outcome was not altered
//! post hoc.

use sha2::{Digest, Sha256};

fn round_digest(seed: &str, round_number: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(round_number.to_string().as_bytes());
    hasher.finalize().into()
}

/// Commit hash published in `round_start`, hex-encoded.
pub fn commit_hash(seed: &str, round_number: u64) -> String {
    hex::encode(round_digest(seed, round_number))
}

/// Deterministic crash multiplier in `[1.00, 101.00)` with 2-decimal
/// granularity.
///
/// The first 8 hex characters of the commit hash (the first 4 digest bytes,
/// big-endian) are folded modulo 10000 and shifted into multiplier space.
pub fn generate_crash_point(seed: &str, round_number: u64) -> f64 {
    let digest = round_digest(seed, round_number);
    let numeric = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(numeric % 10_000) / 100.0 + 1.0
}
