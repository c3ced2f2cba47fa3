/// Cryptographically secure randomness for heirvault.
///
/// Helpers take any `RngCore + CryptoRng`. Production callers pass `OsRng`;
/// tests pass a seeded generator to reproduce outputs.
use rand::{CryptoRng, RngCore};

use crate::crypto::sensitive::SensitiveBytes32;

/// Return `len` random bytes.
pub fn bytes_with_rng<R: RngCore + CryptoRng>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

/// Generate a random 256-bit symmetric key.
pub fn key_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> SensitiveBytes32 {
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    SensitiveBytes32::new(key)
}

/// Random fixed-size array, used for IVs, nonces and salts.
pub fn array_with_rng<R: RngCore + CryptoRng, const N: usize>(rng: &mut R) -> [u8; N] {
    let mut out = [0u8; N];
    rng.fill_bytes(&mut out);
    out
}
