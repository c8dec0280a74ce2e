//! SHA-256 helpers and chain-seed derivation
//!
//! All hashes in the protocol are 64-character lowercase hex strings, and
//! concatenation happens at the byte level of those hex strings — the same
//! on the writer and the verifier.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Size of the random salt mixed into the initial hash.
pub const SALT_BYTES: usize = 32;

/// Size of the per-event PoSW nonce.
pub const NONCE_BYTES: usize = 32;

/// SHA-256 of `data` as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the concatenation of `parts` — the chain primitive
/// `H(a || b || ...)` without an intermediate allocation.
pub fn sha256_hex_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// `bytes` fresh CSPRNG bytes, hex-encoded.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Derive a chain's initial hash: `H(fingerprintHex || hex(32 CSPRNG bytes))`.
///
/// The salt is committed only through the returned hash — it appears in
/// `events[0].previousHash` and nowhere else, so two chains from the same
/// device still start from distinct heads.
pub fn initial_hash(fingerprint_hex: &str) -> String {
    let salt = random_hex(SALT_BYTES);
    sha256_hex_parts(&[fingerprint_hex.as_bytes(), salt.as_bytes()])
}
