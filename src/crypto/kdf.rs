/// PBKDF2-HMAC-SHA256 key derivation.
///
/// Used for answer commitments (random salt per answer) and for the
/// metadata key (fixed application salt over the vault id).
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, VaultError};

/// Derive 32 bytes from `password` and `salt`.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> Result<SensitiveBytes32> {
    if iterations == 0 {
        return Err(VaultError::KeyDerivation(
            "iteration count must be at least 1".to_string(),
        ));
    }

    let mut output = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
    Ok(SensitiveBytes32::new(output))
}
