/// SHA-256 hashing utilities for heirvault.
///
/// SHA-256 is used for:
/// - Advisory ciphertext checksums on encrypted vaults
/// - Normalizing caller-supplied keys to 32 bytes
/// - Legacy (unsalted) answer commitments
use sha2::{Digest, Sha256};

/// Hash arbitrary data with SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Bring a key of any length to exactly 32 bytes.
///
/// 32-byte keys are used as-is; anything else is replaced by its SHA-256
/// digest. This lets callers feed the raw output of share reconstruction
/// straight into the payload cipher.
pub fn normalize_key(key: &[u8]) -> [u8; 32] {
    match <[u8; 32]>::try_from(key) {
        Ok(exact) => exact,
        Err(_) => sha256(key),
    }
}
