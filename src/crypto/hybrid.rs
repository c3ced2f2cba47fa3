/// Hybrid vault encryption: ML-KEM-768 protects the AES key, AES protects the payload.
///
/// Encrypt:
/// 1. encapsulate to the recipient public key → (kem_ct, shared_secret)
/// 2. key = first 32 bytes of shared_secret
/// 3. symmetric encrypt the payload under key
/// 4. attach base64(kem_ct) as `pqcCipherText`
///
/// Decrypt runs the same steps in reverse. A wrong secret key decapsulates
/// to an unrelated secret (implicit rejection), so the failure surfaces in
/// the symmetric step: a tag failure in GCM mode, a padding or parse error in
/// CBC mode. CBC can in rare cases yield plausible-looking garbage instead.
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::crypto::cipher::{self, CipherMode, EncryptedVault};
use crate::crypto::kem;
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

/// Encrypt `payload` to `recipient_public_key` in block mode.
pub fn encrypt_hybrid<T: Serialize + ?Sized>(
    payload: &T,
    recipient_public_key: &[u8],
) -> Result<EncryptedVault> {
    encrypt_hybrid_with_mode(payload, recipient_public_key, CipherMode::Cbc)
}

pub fn encrypt_hybrid_with_mode<T: Serialize + ?Sized>(
    payload: &T,
    recipient_public_key: &[u8],
    mode: CipherMode,
) -> Result<EncryptedVault> {
    encrypt_hybrid_with_rng(payload, recipient_public_key, mode, &mut OsRng)
}

/// Seeded variant. Only the symmetric IV draws from `rng`; the KEM uses its
/// own system randomness.
pub fn encrypt_hybrid_with_rng<T, R>(
    payload: &T,
    recipient_public_key: &[u8],
    mode: CipherMode,
    rng: &mut R,
) -> Result<EncryptedVault>
where
    T: Serialize + ?Sized,
    R: RngCore + CryptoRng,
{
    let encap = kem::encapsulate(recipient_public_key)?;
    let key = kem::shared_secret_to_key(&encap.shared_secret)?;

    let mut encrypted = cipher::encrypt_with_rng(payload, key.as_bytes(), mode, rng)?;
    encrypted.pqc_cipher_text = Some(b64_encode(&encap.ciphertext));

    debug!(?mode, "Hybrid-encrypted payload");
    Ok(encrypted)
}

/// Decrypt a hybrid vault with the recipient's ML-KEM-768 secret key.
pub fn decrypt_hybrid<T: DeserializeOwned>(
    encrypted: &EncryptedVault,
    recipient_secret_key: &[u8],
) -> Result<T> {
    let kem_ct = encrypted.pqc_cipher_text.as_deref().ok_or_else(|| {
        VaultError::InvalidInput("encrypted vault has no pqcCipherText".to_string())
    })?;
    let kem_ct = b64_decode("pqcCipherText", kem_ct)?;

    let shared_secret = kem::decapsulate(&kem_ct, recipient_secret_key)?;
    let key = kem::shared_secret_to_key(&shared_secret)?;

    cipher::decrypt(encrypted, key.as_bytes())
}
